use chrono::{TimeZone, Utc};
use nutmeg::{Config, EvalContext, Value, compute_value};
use serde_json::json;

fn doc(v: serde_json::Value) -> Value {
    Value::from(v)
}

fn eval_on(document: serde_json::Value, expr: serde_json::Value) -> nutmeg::Result<Value> {
    let document = doc(document);
    let ctx = EvalContext::new(&document, Config::default());
    compute_value(&document, &doc(expr), None, &ctx)
}

fn eval(expr: serde_json::Value) -> nutmeg::Result<Value> {
    eval_on(json!({}), expr)
}

// ---- dispatch ----

#[test]
fn test_field_reference() {
    let result = eval_on(json!({"user": {"name": "amy"}}), json!("$user.name")).unwrap();
    assert_eq!(result, Value::from("amy"));
}

#[test]
fn test_missing_field_reference() {
    assert_eq!(eval_on(json!({}), json!("$nope")).unwrap(), Value::Missing);
}

#[test]
fn test_root_and_current_variables() {
    let d = json!({"a": 1});
    assert_eq!(eval_on(d.clone(), json!("$$ROOT")).unwrap(), doc(d.clone()));
    assert_eq!(eval_on(d.clone(), json!("$$CURRENT.a")).unwrap(), Value::Int(1));
}

#[test]
fn test_remove_variable_yields_missing() {
    assert_eq!(eval(json!("$$REMOVE")).unwrap(), Value::Missing);
}

#[test]
fn test_redact_sentinels_pass_through() {
    assert_eq!(eval(json!("$$PRUNE")).unwrap(), Value::from("$$PRUNE"));
    assert_eq!(eval(json!("$$KEEP")).unwrap(), Value::from("$$KEEP"));
}

#[test]
fn test_undefined_variable_errors() {
    assert!(eval(json!("$$nothing")).is_err());
}

#[test]
fn test_single_operator_key_collapses_to_scalar() {
    assert_eq!(eval(json!({"$add": [1, 2, 3]})).unwrap(), Value::Int(6));
}

#[test]
fn test_object_template_keeps_operator_objects_nested() {
    let result = eval_on(
        json!({"n": 4}),
        json!({"a": 1, "b": {"$add": ["$n", 1]}}),
    )
    .unwrap();
    assert_eq!(result, doc(json!({"a": 1, "b": 5})));
}

#[test]
fn test_operator_key_next_to_other_keys_is_ambiguous() {
    assert!(eval(json!({"$add": [1, 2], "other": 1})).is_err());
}

#[test]
fn test_array_expressions_evaluate_elementwise() {
    let result = eval_on(json!({"x": 2}), json!(["$x", {"$add": ["$x", 1]}, "lit"])).unwrap();
    assert_eq!(result, doc(json!([2, 3, "lit"])));
}

// ---- arithmetic ----

#[test]
fn test_add_preserves_integers() {
    assert_eq!(eval(json!({"$add": [1, 2]})).unwrap(), Value::Int(3));
    // Mixed int/float stays integer when mathematically whole
    let mixed = eval(json!({"$add": [1, 2.0]})).unwrap();
    assert_eq!(mixed, Value::Int(3));
    assert_eq!(eval(json!({"$add": [1, 0.5]})).unwrap(), Value::Float(1.5));
}

#[test]
fn test_add_propagates_null() {
    assert_eq!(eval(json!({"$add": [1, null]})).unwrap(), Value::Null);
}

#[test]
fn test_add_to_date_shifts_milliseconds() {
    let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    let d = Value::object([("when", Value::Date(base))]);
    let ctx = EvalContext::new(&d, Config::default());
    let result = compute_value(&d, &doc(json!({"$add": ["$when", 1000]})), None, &ctx).unwrap();
    assert_eq!(result, Value::Date(base + chrono::Duration::seconds(1)));
}

#[test]
fn test_subtract_dates_gives_millis() {
    let a = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 2).unwrap();
    let b = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    let d = Value::object([("a", Value::Date(a)), ("b", Value::Date(b))]);
    let ctx = EvalContext::new(&d, Config::default());
    let result = compute_value(&d, &doc(json!({"$subtract": ["$a", "$b"]})), None, &ctx).unwrap();
    assert_eq!(result, Value::Int(2000));
}

#[test]
fn test_divide_exact_and_fractional() {
    assert_eq!(eval(json!({"$divide": [10, 2]})).unwrap(), Value::Int(5));
    assert_eq!(eval(json!({"$divide": [7, 2]})).unwrap(), Value::Float(3.5));
    assert!(eval(json!({"$divide": [1, 0]})).is_err());
}

#[test]
fn test_multiply_and_mod() {
    assert_eq!(eval(json!({"$multiply": [3, 4, 2]})).unwrap(), Value::Int(24));
    assert_eq!(eval(json!({"$mod": [10, 3]})).unwrap(), Value::Int(1));
    assert!(eval(json!({"$mod": [10, 0]})).is_err());
}

#[test]
fn test_rounding_family() {
    assert_eq!(eval(json!({"$ceil": 4.1})).unwrap(), Value::Float(5.0));
    assert_eq!(eval(json!({"$floor": 4.9})).unwrap(), Value::Float(4.0));
    assert_eq!(eval(json!({"$trunc": -4.7})).unwrap(), Value::Float(-4.0));
    assert_eq!(eval(json!({"$round": [4.567, 2]})).unwrap(), Value::Float(4.57));
    assert_eq!(eval(json!({"$abs": -3})).unwrap(), Value::Int(3));
}

#[test]
fn test_sqrt_of_negative_errors() {
    assert!(eval(json!({"$sqrt": -1})).is_err());
    assert_eq!(eval(json!({"$sqrt": 9})).unwrap(), Value::Float(3.0));
}

#[test]
fn test_pow_contract() {
    assert_eq!(eval(json!({"$pow": [2, 10]})).unwrap(), Value::Int(1024));
    assert!(eval(json!({"$pow": [0, -1]})).is_err());
    assert_eq!(eval(json!({"$pow": [4, 0.5]})).unwrap(), Value::Float(2.0));
}

#[test]
fn test_ln_requires_positive() {
    assert!(eval(json!({"$ln": 0})).is_err());
    assert_eq!(eval(json!({"$log10": 1000})).unwrap(), Value::Float(3.0));
}

// ---- comparison & boolean ----

#[test]
fn test_comparison_operators() {
    assert_eq!(eval(json!({"$cmp": [2, 5]})).unwrap(), Value::Int(-1));
    assert_eq!(eval(json!({"$eq": [1, 1.0]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$gt": [3, 2]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$lte": [2, 2]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$ne": ["a", "b"]})).unwrap(), Value::Bool(true));
}

#[test]
fn test_boolean_operators() {
    assert_eq!(eval(json!({"$and": [1, "x", true]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$and": [1, 0]})).unwrap(), Value::Bool(false));
    assert_eq!(eval(json!({"$or": [0, null, "yes"]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$not": [true]})).unwrap(), Value::Bool(false));
    // Empty string and empty array are truthy
    assert_eq!(eval(json!({"$and": ["", []]})).unwrap(), Value::Bool(true));
}

// ---- conditionals ----

#[test]
fn test_cond_both_forms() {
    assert_eq!(
        eval(json!({"$cond": [true, "yes", "no"]})).unwrap(),
        Value::from("yes")
    );
    assert_eq!(
        eval(json!({"$cond": {"if": false, "then": "yes", "else": "no"}})).unwrap(),
        Value::from("no")
    );
}

#[test]
fn test_if_null_returns_first_non_nil() {
    assert_eq!(
        eval_on(json!({"a": null}), json!({"$ifNull": ["$a", "$b", "fallback"]})).unwrap(),
        Value::from("fallback")
    );
    assert_eq!(eval(json!({"$ifNull": [5, 9]})).unwrap(), Value::Int(5));
}

#[test]
fn test_switch_branches_and_default() {
    let expr = json!({"$switch": {
        "branches": [
            {"case": {"$gt": ["$n", 10]}, "then": "big"},
            {"case": {"$gt": ["$n", 5]}, "then": "medium"},
        ],
        "default": "small",
    }});
    assert_eq!(eval_on(json!({"n": 7}), expr.clone()).unwrap(), Value::from("medium"));
    assert_eq!(eval_on(json!({"n": 1}), expr).unwrap(), Value::from("small"));
    assert!(eval(json!({"$switch": {"branches": [{"case": false, "then": 1}]}})).is_err());
}

// ---- arrays ----

#[test]
fn test_array_elem_at_with_negative_index() {
    assert_eq!(eval(json!({"$arrayElemAt": [[10, 20, 30], -1]})).unwrap(), Value::Int(30));
    assert_eq!(eval(json!({"$arrayElemAt": [[10], 5]})).unwrap(), Value::Missing);
}

#[test]
fn test_concat_arrays_and_null() {
    assert_eq!(
        eval(json!({"$concatArrays": [[1], [2, 3]]})).unwrap(),
        doc(json!([1, 2, 3]))
    );
    assert_eq!(eval(json!({"$concatArrays": [[1], null]})).unwrap(), Value::Null);
}

#[test]
fn test_map_binds_this() {
    let result = eval_on(
        json!({"xs": [1, 2, 3]}),
        json!({"$map": {"input": "$xs", "in": {"$multiply": ["$$this", 10]}}}),
    )
    .unwrap();
    assert_eq!(result, doc(json!([10, 20, 30])));
}

#[test]
fn test_map_with_custom_variable_name() {
    let result = eval_on(
        json!({"xs": [1, 2]}),
        json!({"$map": {"input": "$xs", "as": "n", "in": {"$add": ["$$n", 1]}}}),
    )
    .unwrap();
    assert_eq!(result, doc(json!([2, 3])));
}

#[test]
fn test_filter_keeps_matching_elements() {
    let result = eval_on(
        json!({"xs": [1, 5, 2, 8]}),
        json!({"$filter": {"input": "$xs", "cond": {"$gt": ["$$this", 2]}}}),
    )
    .unwrap();
    assert_eq!(result, doc(json!([5, 8])));
}

#[test]
fn test_reduce_threads_value() {
    let result = eval_on(
        json!({"xs": [1, 2, 3, 4]}),
        json!({"$reduce": {
            "input": "$xs",
            "initialValue": 0,
            "in": {"$add": ["$$value", "$$this"]},
        }}),
    )
    .unwrap();
    assert_eq!(result, Value::Int(10));
}

#[test]
fn test_in_index_of_size_reverse() {
    assert_eq!(eval(json!({"$in": [2, [1, 2, 3]]})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$indexOfArray": [["a", "b", "c"], "b"]})).unwrap(), Value::Int(1));
    assert_eq!(eval(json!({"$indexOfArray": [["a"], "z"]})).unwrap(), Value::Int(-1));
    assert_eq!(
        eval_on(json!({"xs": [1, 2, 3]}), json!({"$size": "$xs"})).unwrap(),
        Value::Int(3)
    );
    assert_eq!(
        eval_on(json!({"xs": [1, 2]}), json!({"$reverseArray": "$xs"})).unwrap(),
        doc(json!([2, 1]))
    );
    assert_eq!(eval(json!({"$isArray": [[1]]})).unwrap(), Value::Bool(true));
}

#[test]
fn test_range_and_slice() {
    assert_eq!(eval(json!({"$range": [0, 6, 2]})).unwrap(), doc(json!([0, 2, 4])));
    assert!(eval(json!({"$range": [0, 5, 0]})).is_err());
    assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], 2]})).unwrap(), doc(json!([1, 2])));
    assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], -2]})).unwrap(), doc(json!([3, 4])));
    assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], 1, 2]})).unwrap(), doc(json!([2, 3])));
    assert!(eval(json!({"$slice": [[1, 2], 0, 0]})).is_err());
}

#[test]
fn test_zip_shortest_and_longest() {
    assert_eq!(
        eval(json!({"$zip": {"inputs": [[1, 2, 3], ["a", "b"]]}})).unwrap(),
        doc(json!([[1, "a"], [2, "b"]]))
    );
    assert_eq!(
        eval(json!({"$zip": {
            "inputs": [[1], ["a", "b"]],
            "useLongestLength": true,
            "defaults": [0, "z"],
        }}))
        .unwrap(),
        doc(json!([[1, "a"], [0, "b"]]))
    );
}

// ---- objects & sets ----

#[test]
fn test_merge_objects_later_wins() {
    let result = eval(json!({"$mergeObjects": [{"a": 1, "b": 1}, {"b": 2}, null]})).unwrap();
    assert_eq!(result, doc(json!({"a": 1, "b": 2})));
}

#[test]
fn test_object_array_round_trip() {
    let as_array = eval(json!({"$objectToArray": {"a": 1, "b": 2}})).unwrap();
    assert_eq!(
        as_array,
        doc(json!([{"k": "a", "v": 1}, {"k": "b", "v": 2}]))
    );
    let back = eval(json!({"$arrayToObject": [[["a", 1], ["b", 2]]]})).unwrap();
    assert_eq!(back, doc(json!({"a": 1, "b": 2})));
}

#[test]
fn test_set_operators() {
    assert_eq!(
        eval(json!({"$setUnion": [[1, 2], [2, 3]]})).unwrap(),
        doc(json!([1, 2, 3]))
    );
    assert_eq!(
        eval(json!({"$setIntersection": [[1, 2, 3], [2, 3, 4]]})).unwrap(),
        doc(json!([2, 3]))
    );
    assert_eq!(
        eval(json!({"$setDifference": [[1, 2, 3], [2]]})).unwrap(),
        doc(json!([1, 3]))
    );
    assert_eq!(
        eval(json!({"$setEquals": [[1, 2, 2], [2, 1]]})).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        eval(json!({"$setIsSubset": [[1, 2], [1, 2, 3]]})).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        eval(json!({"$allElementsTrue": [[1, true, "x"]]})).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        eval(json!({"$anyElementTrue": [[0, false, 1]]})).unwrap(),
        Value::Bool(true)
    );
}

// ---- strings ----

#[test]
fn test_concat_strings() {
    assert_eq!(
        eval(json!({"$concat": ["a", "b", "c"]})).unwrap(),
        Value::from("abc")
    );
    assert_eq!(eval(json!({"$concat": ["a", null]})).unwrap(), Value::Null);
}

#[test]
fn test_string_family() {
    assert_eq!(eval(json!({"$toUpper": "abc"})).unwrap(), Value::from("ABC"));
    assert_eq!(eval(json!({"$toLower": null})).unwrap(), Value::from(""));
    assert_eq!(eval(json!({"$strLenCP": "héllo"})).unwrap(), Value::Int(5));
    assert_eq!(
        eval(json!({"$substrCP": ["héllo", 1, 3]})).unwrap(),
        Value::from("éll")
    );
    assert_eq!(
        eval(json!({"$split": ["a,b,c", ","]})).unwrap(),
        doc(json!(["a", "b", "c"]))
    );
    assert_eq!(eval(json!({"$indexOfCP": ["abcba", "b"]})).unwrap(), Value::Int(1));
    assert_eq!(eval(json!({"$strcasecmp": ["Hello", "hello"]})).unwrap(), Value::Int(0));
    assert_eq!(
        eval(json!({"$trim": {"input": "  x  "}})).unwrap(),
        Value::from("x")
    );
    assert_eq!(
        eval(json!({"$ltrim": {"input": "xxabc", "chars": "x"}})).unwrap(),
        Value::from("abc")
    );
    assert_eq!(
        eval(json!({"$rtrim": {"input": "abcyy", "chars": "y"}})).unwrap(),
        Value::from("abc")
    );
}

// ---- dates ----

#[test]
fn test_date_parts() {
    let when = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap();
    let d = Value::object([("t", Value::Date(when))]);
    let ctx = EvalContext::new(&d, Config::default());
    let part = |expr: serde_json::Value| compute_value(&d, &doc(expr), None, &ctx).unwrap();
    assert_eq!(part(json!({"$year": "$t"})), Value::Int(2021));
    assert_eq!(part(json!({"$month": "$t"})), Value::Int(3));
    assert_eq!(part(json!({"$dayOfMonth": "$t"})), Value::Int(14));
    assert_eq!(part(json!({"$hour": "$t"})), Value::Int(15));
    assert_eq!(part(json!({"$minute": "$t"})), Value::Int(9));
    assert_eq!(part(json!({"$second": "$t"})), Value::Int(26));
    // 2021-03-14 was a Sunday
    assert_eq!(part(json!({"$dayOfWeek": "$t"})), Value::Int(1));
    assert_eq!(part(json!({"$dayOfYear": "$t"})), Value::Int(73));
    assert_eq!(part(json!({"$year": null})), Value::Null);
}

#[test]
fn test_date_to_string() {
    let when = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let d = Value::object([("t", Value::Date(when))]);
    let ctx = EvalContext::new(&d, Config::default());
    let result = compute_value(
        &d,
        &doc(json!({"$dateToString": {"format": "%Y-%m-%d %H:%M:%S", "date": "$t"}})),
        None,
        &ctx,
    )
    .unwrap();
    assert_eq!(result, Value::from("2021-03-04 05:06:07"));
    assert!(
        compute_value(
            &d,
            &doc(json!({"$dateToString": {"format": "%Q", "date": "$t"}})),
            None,
            &ctx,
        )
        .is_err()
    );
}

// ---- type conversion ----

#[test]
fn test_type_reports_int_vs_long() {
    assert_eq!(eval(json!({"$type": 5})).unwrap(), Value::from("int"));
    assert_eq!(
        eval(json!({"$type": 5_000_000_000_i64})).unwrap(),
        Value::from("long")
    );
    assert_eq!(eval(json!({"$type": 1.5})).unwrap(), Value::from("double"));
    assert_eq!(eval(json!({"$type": "x"})).unwrap(), Value::from("string"));
    assert_eq!(eval(json!({"$type": null})).unwrap(), Value::from("null"));
    assert_eq!(eval_on(json!({}), json!({"$type": "$nope"})).unwrap(), Value::from("missing"));
}

#[test]
fn test_conversions() {
    assert_eq!(eval(json!({"$toInt": "42"})).unwrap(), Value::Int(42));
    assert_eq!(eval(json!({"$toDouble": "2.5"})).unwrap(), Value::Float(2.5));
    assert_eq!(eval(json!({"$toString": 7})).unwrap(), Value::from("7"));
    assert_eq!(eval(json!({"$toBool": 0})).unwrap(), Value::Bool(false));
    // Any string converts to true
    assert_eq!(eval(json!({"$toBool": ""})).unwrap(), Value::Bool(true));
    assert_eq!(eval(json!({"$toInt": null})).unwrap(), Value::Null);
    assert!(eval(json!({"$toInt": "abc"})).is_err());
}

#[test]
fn test_convert_with_on_error_and_on_null() {
    assert_eq!(
        eval(json!({"$convert": {"input": "nope", "to": "int", "onError": -1}})).unwrap(),
        Value::Int(-1)
    );
    assert_eq!(
        eval(json!({"$convert": {"input": null, "to": "int", "onNull": 0}})).unwrap(),
        Value::Int(0)
    );
}

#[test]
fn test_to_date_from_string_and_millis() {
    let expected = Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(
        eval(json!({"$toDate": "2021-01-02T03:04:05Z"})).unwrap(),
        Value::Date(expected)
    );
    assert_eq!(
        eval(json!({"$toDate": 0})).unwrap(),
        Value::Date(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
    );
}

// ---- literals & let ----

#[test]
fn test_literal_suppresses_evaluation() {
    assert_eq!(
        eval(json!({"$literal": {"$add": [1, 2]}})).unwrap(),
        doc(json!({"$add": [1, 2]}))
    );
}

#[test]
fn test_let_binds_variables() {
    let result = eval(json!({"$let": {
        "vars": {"low": 1, "high": {"$add": [1, 9]}},
        "in": {"$add": ["$$low", "$$high"]},
    }}))
    .unwrap();
    assert_eq!(result, Value::Int(11));
}

// ---- accumulators in expression position ----

#[test]
fn test_group_accumulator_over_array_expression() {
    let result = eval_on(json!({"xs": [1, 2, 3]}), json!({"$sum": "$xs"})).unwrap();
    assert_eq!(result, Value::Int(6));
    let result = eval_on(json!({"xs": [1, 2, 3]}), json!({"$avg": "$xs"})).unwrap();
    assert_eq!(result, Value::Float(2.0));
    let result = eval_on(json!({"xs": [4, 1, 9]}), json!({"$max": "$xs"})).unwrap();
    assert_eq!(result, Value::Int(9));
}

#[test]
fn test_accumulator_requires_array() {
    assert!(eval_on(json!({"x": 3}), json!({"$sum": "$x"})).is_err());
}
