//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, records and store names that the engine
//! accepts.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use stowdb_engine::Key;

/// Strategy for keys of every kind.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Int),
        "[a-zA-Z0-9_\\-]{0,24}".prop_map(Key::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Key::Bytes),
    ]
}

/// Strategy for keys that can live in a record field (integers and strings).
pub fn inline_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Int),
        "[a-z][a-z0-9]{0,15}".prop_map(Key::Text),
    ]
}

/// Strategy for valid object store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for JSON leaf values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,32}".prop_map(Value::String),
    ]
}

/// Strategy for nested JSON values up to a small depth.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for object records without an `id` field.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-hj-z][a-z]{0,7}", value_strategy(), 0..6)
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>()))
}

/// Strategy for records carrying an in-line key under `id`.
pub fn keyed_record_strategy() -> impl Strategy<Value = (Key, Value)> {
    (inline_key_strategy(), record_strategy()).prop_map(|(key, mut record)| {
        if let Value::Object(map) = &mut record {
            map.insert("id".to_string(), key.to_value());
        }
        (key, record)
    })
}
