use chrono::{TimeZone, Utc};
use nutmeg::{Value, codec, path};
use serde_json::json;

fn doc(v: serde_json::Value) -> Value {
    Value::from(v)
}

// ---- equality ----

#[test]
fn test_equality_is_symmetric() {
    let a = doc(json!({"x": [1, {"y": "z"}], "n": null}));
    let b = doc(json!({"n": null, "x": [1, {"y": "z"}]}));
    assert_eq!(a, b);
    assert_eq!(b, a);
}

#[test]
fn test_cross_type_numeric_equality() {
    assert_eq!(Value::Int(1), Value::Float(1.0));
    assert_eq!(Value::Float(2.0), Value::Int(2));
    assert_ne!(Value::Int(1), Value::Float(1.5));
}

#[test]
fn test_nan_equals_nan() {
    let nan = Value::Float(f64::NAN);
    assert_eq!(nan, nan.clone());
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
}

#[test]
fn test_zero_equals_negative_zero() {
    assert_eq!(Value::Float(0.0), Value::Float(-0.0));
    assert_eq!(Value::Int(0), Value::Float(-0.0));
}

#[test]
fn test_object_key_order_irrelevant_array_order_significant() {
    assert_eq!(doc(json!({"a": 1, "b": 2})), doc(json!({"b": 2, "a": 1})));
    assert_ne!(doc(json!([1, 2])), doc(json!([2, 1])));
}

#[test]
fn test_null_is_not_missing() {
    assert_ne!(Value::Null, Value::Missing);
    assert!(Value::Null.is_nil());
    assert!(Value::Missing.is_nil());
}

#[test]
fn test_compare_orders_types_before_values() {
    // null < number < string < bool per the type ranking
    assert!(Value::Null.compare(&Value::Int(0)).is_lt());
    assert!(Value::Int(99).compare(&Value::from("a")).is_lt());
    assert!(Value::from("zzz").compare(&Value::Bool(false)).is_lt());
    assert!(Value::Int(3).compare(&Value::Float(2.5)).is_gt());
}

// ---- canonical codec ----

#[test]
fn test_encode_sorts_object_keys() {
    let v = doc(json!({"b": 2, "a": 1}));
    assert_eq!(codec::encode(&v), r#"{"a":1,"b":2}"#);
}

#[test]
fn test_encode_is_canonical_across_numeric_types() {
    assert_eq!(
        codec::encode(&Value::Float(2.0)),
        codec::encode(&Value::Int(2))
    );
    assert_ne!(
        codec::encode(&Value::Float(2.5)),
        codec::encode(&Value::Int(2))
    );
}

#[test]
fn test_codec_round_trip() {
    let values = vec![
        Value::Null,
        Value::Missing,
        Value::Bool(true),
        Value::Int(-42),
        Value::Float(3.25),
        Value::Float(f64::NAN),
        Value::Float(f64::INFINITY),
        Value::Float(f64::NEG_INFINITY),
        Value::from("hello \"world\"\n"),
        Value::Date(Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap()),
        Value::Regex(regex::Regex::new("^a.*b$").unwrap()),
        doc(json!([1, "two", null, [3, 4], {"k": "v"}])),
        doc(json!({"nested": {"deep": {"list": [1.5, true]}}})),
    ];
    for v in values {
        let encoded = codec::encode(&v);
        let decoded = codec::decode(&encoded).unwrap();
        assert_eq!(decoded, v, "round trip failed for {}", encoded);
    }
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(codec::decode("{oops").is_err());
    assert!(codec::decode("[1,").is_err());
    assert!(codec::decode("1 2").is_err());
}

// ---- path resolution ----

#[test]
fn test_resolve_simple_and_nested() {
    let d = doc(json!({"a": {"b": {"c": 5}}}));
    assert_eq!(path::resolve(&d, "a.b.c"), Value::Int(5));
    assert_eq!(path::resolve(&d, "a.b"), doc(json!({"c": 5})));
    assert_eq!(path::resolve(&d, "a.x"), Value::Missing);
    assert_eq!(path::resolve(&d, "z"), Value::Missing);
}

#[test]
fn test_resolve_numeric_index() {
    let d = doc(json!({"items": ["a", "b", "c"]}));
    assert_eq!(path::resolve(&d, "items.1"), Value::from("b"));
    assert_eq!(path::resolve(&d, "items.9"), Value::Missing);
}

#[test]
fn test_resolve_distributes_over_arrays() {
    let d = doc(json!({"orders": [{"price": 5}, {"price": 9}, {"note": "x"}]}));
    assert_eq!(
        path::resolve(&d, "orders.price"),
        doc(json!([5, 9])),
    );
}

#[test]
fn test_resolve_mixed_index_then_field() {
    let d = doc(json!({"orders": [{"price": 5}, {"price": 9}]}));
    assert_eq!(path::resolve(&d, "orders.0.price"), Value::Int(5));
}

#[test]
fn test_resolve_does_not_double_flatten() {
    // Nested arrays stop distribution at the second level
    let d = doc(json!({"a": [[{"b": 1}], [{"b": 2}]]}));
    let (resolved, depth) = path::resolve_with_depth(&d, "a.b");
    assert_eq!(depth, 1);
    assert_eq!(resolved, doc(json!([[{"b": 1}], [{"b": 2}]])));
}

#[test]
fn test_resolve_is_pure() {
    let d = doc(json!({"a": [{"b": 1}, {"b": 2}], "c": {"d": null}}));
    let snapshot = d.clone();
    let _ = path::resolve(&d, "a.b");
    let _ = path::resolve(&d, "c.d");
    let _ = path::resolve(&d, "missing.path");
    assert_eq!(d, snapshot);
    // Resolving against a codec round-tripped clone gives the same value
    let clone = codec::decode(&codec::encode(&d)).unwrap();
    assert_eq!(path::resolve(&clone, "a.b"), path::resolve(&d, "a.b"));
}

#[test]
fn test_unwrap_peels_single_element_wrappers() {
    let v = doc(json!([[5]]));
    assert_eq!(path::unwrap(v.clone(), 2), Value::Int(5));
    assert_eq!(path::unwrap(v.clone(), 1), doc(json!([5])));
    assert_eq!(path::unwrap(doc(json!([1, 2])), 1), doc(json!([1, 2])));
}

#[test]
fn test_set_value_auto_creates_intermediates() {
    let mut d = doc(json!({}));
    path::set_value(&mut d, "a.b.c", Value::Int(7));
    assert_eq!(d, doc(json!({"a": {"b": {"c": 7}}})));
}

#[test]
fn test_set_value_into_array_index() {
    let mut d = doc(json!({"items": [{"x": 1}, {"x": 2}]}));
    path::set_value(&mut d, "items.1.x", Value::Int(9));
    assert_eq!(d, doc(json!({"items": [{"x": 1}, {"x": 9}]})));
}

#[test]
fn test_remove_value() {
    let mut d = doc(json!({"a": {"b": 1, "c": 2}, "d": 3}));
    path::remove_value(&mut d, "a.b");
    path::remove_value(&mut d, "nope.deep");
    assert_eq!(d, doc(json!({"a": {"c": 2}, "d": 3})));
}

#[test]
fn test_resolve_obj_minimal_subdocument() {
    let d = doc(json!({"a": {"b": 1, "c": 2}, "d": 3}));
    assert_eq!(path::resolve_obj(&d, "a.b", false), doc(json!({"a": {"b": 1}})));
    assert_eq!(path::resolve_obj(&d, "a.x", false), Value::Missing);
}

#[test]
fn test_resolve_obj_through_arrays() {
    let d = doc(json!({"a": [{"b": 1}, {"c": 2}]}));
    assert_eq!(
        path::resolve_obj(&d, "a.b", false),
        doc(json!({"a": [{"b": 1}, {}]})),
    );
}

#[test]
fn test_merge_objects_and_arrays() {
    let mut target = doc(json!({"a": {"b": 1}, "list": [{"x": 1}, {"x": 2}]}));
    path::merge(
        &mut target,
        doc(json!({"a": {"c": 2}, "list": [{"y": 9}]})),
    );
    assert_eq!(
        target,
        doc(json!({"a": {"b": 1, "c": 2}, "list": [{"x": 1, "y": 9}, {"x": 2}]})),
    );
}
