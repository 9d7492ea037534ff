use std::cell::RefCell;
use std::rc::Rc;

use nutmeg::{AggregateOptions, Aggregator, Collation, Error, Value, aggregate};
use serde_json::json;

fn doc(v: serde_json::Value) -> Value {
    Value::from(v)
}

fn docs(items: Vec<serde_json::Value>) -> Vec<Value> {
    items.into_iter().map(Value::from).collect()
}

fn run(collection: Vec<serde_json::Value>, stages: Vec<serde_json::Value>) -> Vec<Value> {
    aggregate(&docs(collection), docs(stages)).unwrap()
}

fn run_err(collection: Vec<serde_json::Value>, stages: Vec<serde_json::Value>) -> Error {
    aggregate(&docs(collection), docs(stages)).unwrap_err()
}

// ---- end to end scenarios ----

#[test]
fn test_group_counts_in_first_seen_order() {
    let result = run(
        vec![json!({"a": 1}), json!({"a": 1}), json!({"a": 2})],
        vec![json!({"$group": {"_id": "$a", "count": {"$sum": 1}}})],
    );
    assert_eq!(
        result,
        docs(vec![json!({"_id": 1, "count": 2}), json!({"_id": 2, "count": 1})])
    );
}

#[test]
fn test_unwind_expands_arrays() {
    let result = run(
        vec![json!({"a": [1, 2, 3]})],
        vec![json!({"$unwind": "$a"})],
    );
    assert_eq!(
        result,
        docs(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})])
    );
}

#[test]
fn test_project_passes_id_through() {
    let result = run(
        vec![json!({"a": 1, "b": 2})],
        vec![json!({"$project": {"a": 1}})],
    );
    assert_eq!(result, docs(vec![json!({"a": 1})]));

    let with_id = run(
        vec![json!({"_id": 9, "a": 1, "b": 2})],
        vec![json!({"$project": {"a": 1}})],
    );
    assert_eq!(with_id, docs(vec![json!({"_id": 9, "a": 1})]));
}

#[test]
fn test_project_mixing_inclusion_and_exclusion_fails() {
    let err = run_err(
        vec![json!({"a": 1, "b": 2})],
        vec![json!({"$project": {"a": 1, "b": 0}})],
    );
    assert!(matches!(err, Error::Projection(_)));
    assert!(err.to_string().contains("cannot mix"));
}

// ---- $match ----

#[test]
fn test_match_filters_and_is_idempotent() {
    let collection = vec![json!({"n": 1}), json!({"n": 5}), json!({"n": 9})];
    let once = run(collection.clone(), vec![json!({"$match": {"n": {"$gt": 2}}})]);
    let twice = run(
        collection,
        vec![
            json!({"$match": {"n": {"$gt": 2}}}),
            json!({"$match": {"n": {"$gt": 2}}}),
        ],
    );
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

// ---- $group ----

#[test]
fn test_group_accumulators() {
    let collection = vec![
        json!({"k": "a", "n": 1}),
        json!({"k": "a", "n": 3}),
        json!({"k": "b", "n": 5}),
    ];
    let result = run(
        collection,
        vec![json!({"$group": {
            "_id": "$k",
            "total": {"$sum": "$n"},
            "mean": {"$avg": "$n"},
            "low": {"$min": "$n"},
            "high": {"$max": "$n"},
            "first": {"$first": "$n"},
            "last": {"$last": "$n"},
            "all": {"$push": "$n"},
            "count": {"$count": []},
        }})],
    );
    assert_eq!(
        result,
        docs(vec![
            json!({"_id": "a", "total": 4, "mean": 2.0, "low": 1, "high": 3,
                   "first": 1, "last": 3, "all": [1, 3], "count": 2}),
            json!({"_id": "b", "total": 5, "mean": 5.0, "low": 5, "high": 5,
                   "first": 5, "last": 5, "all": [5], "count": 1}),
        ])
    );
}

#[test]
fn test_group_null_key_collects_everything() {
    let result = run(
        vec![json!({"n": 1}), json!({"n": 2})],
        vec![json!({"$group": {"_id": null, "total": {"$sum": "$n"}}})],
    );
    assert_eq!(result, docs(vec![json!({"_id": null, "total": 3})]));
}

#[test]
fn test_group_missing_key_omits_id_field() {
    let result = run(
        vec![json!({"n": 1})],
        vec![json!({"$group": {"_id": "$nope", "total": {"$sum": "$n"}}})],
    );
    assert_eq!(result, docs(vec![json!({"total": 1})]));
}

#[test]
fn test_group_add_to_set_deduplicates() {
    let result = run(
        vec![json!({"c": "x"}), json!({"c": "y"}), json!({"c": "x"})],
        vec![json!({"$group": {"_id": null, "cs": {"$addToSet": "$c"}}})],
    );
    assert_eq!(result, docs(vec![json!({"_id": null, "cs": ["x", "y"]})]));
}

#[test]
fn test_group_numeric_keys_hash_canonically() {
    // 1 and 1.0 land in the same group
    let result = run(
        vec![json!({"a": 1}), json!({"a": 1.0})],
        vec![json!({"$group": {"_id": "$a", "count": {"$sum": 1}}})],
    );
    assert_eq!(result, docs(vec![json!({"_id": 1, "count": 2})]));
}

#[test]
fn test_group_partition_completeness() {
    let collection: Vec<serde_json::Value> =
        (0..20).map(|i| json!({"i": i, "k": i % 3})).collect();
    let result = run(
        collection,
        vec![json!({"$group": {"_id": "$k", "members": {"$push": "$i"}}})],
    );
    let mut seen: Vec<i64> = result
        .iter()
        .flat_map(|g| {
            g.as_object().unwrap()["members"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_i64().unwrap())
                .collect::<Vec<_>>()
        })
        .collect();
    seen.sort();
    assert_eq!(seen, (0..20).collect::<Vec<i64>>());
}

#[test]
fn test_group_requires_single_accumulator_per_field() {
    let err = run_err(
        vec![json!({"n": 1})],
        vec![json!({"$group": {"_id": null, "x": {"$sum": "$n", "$avg": "$n"}}})],
    );
    assert!(matches!(err, Error::Pipeline(_)));
}

#[test]
fn test_group_std_dev() {
    let result = run(
        vec![json!({"n": 2}), json!({"n": 4})],
        vec![json!({"$group": {
            "_id": null,
            "pop": {"$stdDevPop": "$n"},
            "samp": {"$stdDevSamp": "$n"},
        }})],
    );
    let g = result[0].as_object().unwrap();
    assert_eq!(g["pop"], Value::Float(1.0));
    assert!((g["samp"].as_f64().unwrap() - std::f64::consts::SQRT_2).abs() < 1e-12);
}

// ---- $sort ----

#[test]
fn test_sort_is_stable() {
    let result = run(
        vec![
            json!({"k": 1, "tag": "first"}),
            json!({"k": 0, "tag": "x"}),
            json!({"k": 1, "tag": "second"}),
            json!({"k": 1, "tag": "third"}),
        ],
        vec![json!({"$sort": {"k": 1}})],
    );
    let tags: Vec<&str> = result
        .iter()
        .filter(|d| d.as_object().unwrap()["k"] == Value::Int(1))
        .map(|d| d.as_object().unwrap()["tag"].as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["first", "second", "third"]);
}

#[test]
fn test_sort_multi_key_respects_declaration_order() {
    let result = run(
        vec![
            json!({"a": 1, "b": 2}),
            json!({"a": 2, "b": 1}),
            json!({"a": 1, "b": 1}),
        ],
        vec![json!({"$sort": {"a": 1, "b": -1}})],
    );
    assert_eq!(
        result,
        docs(vec![
            json!({"a": 1, "b": 2}),
            json!({"a": 1, "b": 1}),
            json!({"a": 2, "b": 1}),
        ])
    );
}

#[test]
fn test_sort_nulls_and_missing_first_even_descending() {
    let result = run(
        vec![json!({"n": 5}), json!({}), json!({"n": null}), json!({"n": 9})],
        vec![json!({"$sort": {"n": -1}})],
    );
    assert_eq!(
        result,
        docs(vec![json!({}), json!({"n": null}), json!({"n": 9}), json!({"n": 5})])
    );
}

#[test]
fn test_sort_with_collation() {
    let collection = docs(vec![
        json!({"s": "banana"}),
        json!({"s": "Apple"}),
        json!({"s": "cherry"}),
    ]);
    let aggregator = Aggregator::with_options(
        docs(vec![json!({"$sort": {"s": 1}})]),
        AggregateOptions {
            collation: Some(Collation {
                locale: "en".to_string(),
                strength: 2,
            }),
            ..AggregateOptions::default()
        },
    );
    let result = aggregator.run(&collection, None).unwrap();
    let order: Vec<&str> = result
        .iter()
        .map(|d| d.as_object().unwrap()["s"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["Apple", "banana", "cherry"]);
}

#[test]
fn test_sort_rejects_bad_direction() {
    assert!(matches!(
        run_err(vec![json!({})], vec![json!({"$sort": {"a": 2}})]),
        Error::Pipeline(_)
    ));
}

// ---- $skip / $limit ----

#[test]
fn test_skip_then_limit_equals_slicing() {
    let collection: Vec<serde_json::Value> = (0..10).map(|i| json!({"i": i})).collect();
    let result = run(
        collection.clone(),
        vec![json!({"$skip": 3}), json!({"$limit": 4})],
    );
    assert_eq!(result, docs(collection[3..7].to_vec()));
}

// ---- $unwind options ----

#[test]
fn test_unwind_with_index_field() {
    let result = run(
        vec![json!({"a": ["x", "y"]})],
        vec![json!({"$unwind": {"path": "$a", "includeArrayIndex": "pos"}})],
    );
    assert_eq!(
        result,
        docs(vec![json!({"a": "x", "pos": 0}), json!({"a": "y", "pos": 1})])
    );
}

#[test]
fn test_unwind_drops_empty_and_missing_by_default() {
    let result = run(
        vec![json!({"a": []}), json!({"b": 1}), json!({"a": null})],
        vec![json!({"$unwind": "$a"})],
    );
    assert!(result.is_empty());
}

#[test]
fn test_unwind_preserves_null_and_empty_when_asked() {
    let result = run(
        vec![json!({"a": [], "k": 1}), json!({"k": 2}), json!({"a": null, "k": 3})],
        vec![json!({"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}})],
    );
    assert_eq!(
        result,
        docs(vec![json!({"k": 1}), json!({"k": 2}), json!({"a": null, "k": 3})])
    );
}

#[test]
fn test_unwind_passes_scalars_through() {
    let result = run(vec![json!({"a": 7})], vec![json!({"$unwind": "$a"})]);
    assert_eq!(result, docs(vec![json!({"a": 7})]));
}

// ---- projection stages ----

#[test]
fn test_project_computed_fields_and_nested_paths() {
    let result = run(
        vec![json!({"first": "Ada", "last": "Lovelace", "info": {"born": 1815, "died": 1852}})],
        vec![json!({"$project": {
            "name": {"$concat": ["$first", " ", "$last"]},
            "info.born": 1,
        }})],
    );
    assert_eq!(
        result,
        docs(vec![json!({"name": "Ada Lovelace", "info": {"born": 1815}})])
    );
}

#[test]
fn test_project_remove_variable_omits_field() {
    let result = run(
        vec![json!({"a": 1, "b": 2})],
        vec![json!({"$project": {
            "a": 1,
            "b": {"$cond": [{"$gt": ["$b", 10]}, "$b", "$$REMOVE"]},
        }})],
    );
    assert_eq!(result, docs(vec![json!({"a": 1})]));
}

#[test]
fn test_project_slice_and_elem_match() {
    let result = run(
        vec![json!({"xs": [1, 2, 3, 4], "k": 1})],
        vec![json!({"$project": {"xs": {"$slice": 2}}})],
    );
    assert_eq!(result, docs(vec![json!({"xs": [1, 2], "k": 1})]));

    let matched = run(
        vec![json!({"xs": [{"n": 1}, {"n": 5}, {"n": 9}]})],
        vec![json!({"$project": {"xs": {"$elemMatch": {"n": {"$gte": 5}}}}})],
    );
    assert_eq!(matched, docs(vec![json!({"xs": [{"n": 5}]})]));
}

#[test]
fn test_add_fields_and_unset() {
    let result = run(
        vec![json!({"a": 1})],
        vec![
            json!({"$addFields": {"b": {"$add": ["$a", 1]}, "meta.tag": "x"}}),
            json!({"$unset": "meta"}),
        ],
    );
    assert_eq!(result, docs(vec![json!({"a": 1, "b": 2})]));
}

#[test]
fn test_set_is_an_alias_for_add_fields() {
    let result = run(
        vec![json!({"a": 1})],
        vec![json!({"$set": {"b": 9}})],
    );
    assert_eq!(result, docs(vec![json!({"a": 1, "b": 9})]));
}

// ---- $count / $sortByCount ----

#[test]
fn test_count_stage() {
    let result = run(
        vec![json!({"n": 1}), json!({"n": 5}), json!({"n": 9})],
        vec![json!({"$match": {"n": {"$gt": 2}}}), json!({"$count": "matched"})],
    );
    assert_eq!(result, docs(vec![json!({"matched": 2})]));
    assert!(matches!(
        run_err(vec![], vec![json!({"$count": "$bad"})]),
        Error::Pipeline(_)
    ));
}

#[test]
fn test_sort_by_count() {
    let result = run(
        vec![
            json!({"c": "red"}),
            json!({"c": "blue"}),
            json!({"c": "red"}),
            json!({"c": "red"}),
            json!({"c": "blue"}),
        ],
        vec![json!({"$sortByCount": "$c"})],
    );
    assert_eq!(
        result,
        docs(vec![
            json!({"_id": "red", "count": 3}),
            json!({"_id": "blue", "count": 2}),
        ])
    );
}

// ---- $replaceRoot / $redact ----

#[test]
fn test_replace_root_and_replace_with() {
    let collection = vec![json!({"name": "x", "inner": {"a": 1}})];
    let result = run(
        collection.clone(),
        vec![json!({"$replaceRoot": {"newRoot": "$inner"}})],
    );
    assert_eq!(result, docs(vec![json!({"a": 1})]));
    let result = run(collection, vec![json!({"$replaceWith": "$inner"})]);
    assert_eq!(result, docs(vec![json!({"a": 1})]));
}

#[test]
fn test_replace_root_rejects_non_objects() {
    assert!(matches!(
        run_err(
            vec![json!({"inner": 5})],
            vec![json!({"$replaceRoot": {"newRoot": "$inner"}})],
        ),
        Error::Type(_)
    ));
}

#[test]
fn test_redact_prune_and_descend() {
    let collection = vec![
        json!({"level": 1, "title": "public", "details": {"level": 5, "secret": "x"}}),
        json!({"level": 5, "title": "classified"}),
    ];
    let result = run(
        collection,
        vec![json!({"$redact": {
            "$cond": [{"$lte": ["$level", 3]}, "$$DESCEND", "$$PRUNE"],
        }})],
    );
    assert_eq!(result, docs(vec![json!({"level": 1, "title": "public"})]));
}

// ---- buckets ----

#[test]
fn test_bucket_with_default() {
    let result = run(
        vec![
            json!({"price": 5}),
            json!({"price": 15}),
            json!({"price": 25}),
            json!({"price": 105}),
        ],
        vec![json!({"$bucket": {
            "groupBy": "$price",
            "boundaries": [0, 10, 30],
            "default": "other",
        }})],
    );
    assert_eq!(
        result,
        docs(vec![
            json!({"_id": 0, "count": 1}),
            json!({"_id": 10, "count": 2}),
            json!({"_id": "other", "count": 1}),
        ])
    );
}

#[test]
fn test_bucket_without_default_errors_on_outliers() {
    assert!(matches!(
        run_err(
            vec![json!({"price": 99})],
            vec![json!({"$bucket": {"groupBy": "$price", "boundaries": [0, 10]}})],
        ),
        Error::Pipeline(_)
    ));
}

#[test]
fn test_bucket_validates_boundaries() {
    let descending = run_err(
        vec![],
        vec![json!({"$bucket": {"groupBy": "$p", "boundaries": [10, 0]}})],
    );
    assert!(descending.to_string().contains("ascending"));
    let mixed = run_err(
        vec![],
        vec![json!({"$bucket": {"groupBy": "$p", "boundaries": [0, "x"]}})],
    );
    assert!(mixed.to_string().contains("type"));
}

#[test]
fn test_bucket_custom_output() {
    let result = run(
        vec![json!({"p": 1, "n": 10}), json!({"p": 2, "n": 20})],
        vec![json!({"$bucket": {
            "groupBy": "$p",
            "boundaries": [0, 5],
            "output": {"total": {"$sum": "$n"}},
        }})],
    );
    assert_eq!(result, docs(vec![json!({"_id": 0, "total": 30})]));
}

#[test]
fn test_bucket_auto_splits_evenly() {
    let collection: Vec<serde_json::Value> = (1..=8).map(|i| json!({"n": i})).collect();
    let result = run(
        collection,
        vec![json!({"$bucketAuto": {"groupBy": "$n", "buckets": 4}})],
    );
    assert_eq!(result.len(), 4);
    for bucket in &result {
        assert_eq!(bucket.as_object().unwrap()["count"], Value::Int(2));
    }
    // Boundaries chain: each bucket's max is the next one's min
    let ids: Vec<&nutmeg::Map> = result
        .iter()
        .map(|b| b.as_object().unwrap()["_id"].as_object().unwrap())
        .collect();
    for pair in ids.windows(2) {
        assert_eq!(pair[0]["max"], pair[1]["min"]);
    }
}

#[test]
fn test_bucket_auto_oversizes_on_equal_keys() {
    // Inherited behavior: a run of equal keys stays in one bucket, which
    // can exceed the approximate size
    let result = run(
        vec![
            json!({"n": 1}),
            json!({"n": 1}),
            json!({"n": 1}),
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"n": 3}),
        ],
        vec![json!({"$bucketAuto": {"groupBy": "$n", "buckets": 2}})],
    );
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].as_object().unwrap()["count"], Value::Int(4));
    assert_eq!(result[1].as_object().unwrap()["count"], Value::Int(2));
}

// ---- $lookup / $facet ----

#[test]
fn test_lookup_joins_by_key() {
    let orders = vec![
        json!({"item": "pen", "qty": 2}),
        json!({"item": "ink", "qty": 1}),
        json!({"item": "gum", "qty": 5}),
    ];
    let inventory = json!([
        {"sku": "pen", "stock": 9},
        {"sku": "ink", "stock": 0},
        {"sku": "pen", "stock": 3},
    ]);
    let result = run(
        orders,
        vec![json!({"$lookup": {
            "from": inventory,
            "localField": "item",
            "foreignField": "sku",
            "as": "stocked",
        }})],
    );
    assert_eq!(
        result,
        docs(vec![
            json!({"item": "pen", "qty": 2,
                   "stocked": [{"sku": "pen", "stock": 9}, {"sku": "pen", "stock": 3}]}),
            json!({"item": "ink", "qty": 1, "stocked": [{"sku": "ink", "stock": 0}]}),
            json!({"item": "gum", "qty": 5, "stocked": []}),
        ])
    );
}

#[test]
fn test_lookup_requires_fields() {
    assert!(matches!(
        run_err(
            vec![json!({})],
            vec![json!({"$lookup": {"from": [], "localField": "a", "as": "x"}})],
        ),
        Error::Pipeline(_)
    ));
}

#[test]
fn test_facet_runs_independent_pipelines() {
    let collection = vec![json!({"n": 1}), json!({"n": 5}), json!({"n": 9})];
    let result = run(
        collection,
        vec![json!({"$facet": {
            "big": [{"$match": {"n": {"$gt": 4}}}, {"$count": "c"}],
            "all": [{"$group": {"_id": null, "total": {"$sum": "$n"}}}],
        }})],
    );
    assert_eq!(
        result,
        docs(vec![json!({
            "big": [{"c": 2}],
            "all": [{"_id": null, "total": 15}],
        })])
    );
}

// ---- $sample / $out ----

#[test]
fn test_sample_returns_requested_size() {
    let collection: Vec<serde_json::Value> = (0..50).map(|i| json!({"i": i})).collect();
    let result = run(collection, vec![json!({"$sample": {"size": 7}})]);
    assert_eq!(result.len(), 7);
    // All sampled documents come from the input, without duplication
    let mut seen: Vec<i64> = result
        .iter()
        .map(|d| d.as_object().unwrap()["i"].as_i64().unwrap())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 7);
}

#[test]
fn test_out_appends_to_sink_and_passes_through() {
    let sink = Rc::new(RefCell::new(Vec::new()));
    let collection = docs(vec![json!({"n": 1}), json!({"n": 2})]);
    let aggregator = Aggregator::with_options(
        docs(vec![json!({"$match": {"n": {"$gt": 0}}}), json!({"$out": null})]),
        AggregateOptions {
            sink: Some(sink.clone()),
            ..AggregateOptions::default()
        },
    );
    let result = aggregator.run(&collection, None).unwrap();
    assert_eq!(result, collection);
    assert_eq!(*sink.borrow(), collection);
}

#[test]
fn test_out_without_sink_fails() {
    assert!(matches!(
        run_err(vec![json!({})], vec![json!({"$out": null})]),
        Error::Pipeline(_)
    ));
}

// ---- stage validation ----

#[test]
fn test_stage_must_have_exactly_one_operator() {
    let err = run_err(
        vec![json!({})],
        vec![json!({"$match": {}, "$limit": 1})],
    );
    assert!(err.to_string().contains("single-operator"));
}

#[test]
fn test_unknown_stage_operator() {
    assert!(matches!(
        run_err(vec![json!({})], vec![json!({"$teleport": {}})]),
        Error::UnknownOperator(_, _)
    ));
}

// ---- streaming ----

#[test]
fn test_stream_is_lazy_until_pulled() {
    let collection = docs(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    let aggregator = Aggregator::new(docs(vec![json!({"$match": {"n": {"$gte": 2}}})]));
    let mut seq = aggregator.stream(&collection, None).unwrap();
    assert_eq!(seq.next().unwrap().unwrap(), doc(json!({"n": 2})));
    assert_eq!(seq.next().unwrap().unwrap(), doc(json!({"n": 3})));
    assert!(seq.next().is_none());
}
