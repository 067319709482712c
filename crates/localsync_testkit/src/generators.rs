//! Property-based test generators using proptest.

use localsync_core::{Attributes, Method};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for scalar JSON attribute values.
pub fn attribute_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
    ]
}

/// Strategy for attribute maps without an `id`.
pub fn attributes_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(attribute_name_strategy(), attribute_value_strategy(), 0..8).prop_map(
        |map| {
            map.into_iter()
                .filter(|(name, _)| name != "id")
                .collect()
        },
    )
}

/// Strategy for write methods, the ones that can end up queued.
pub fn write_method_strategy() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::Create),
        Just(Method::Update),
        Just(Method::Patch),
        Just(Method::Delete),
    ]
}

/// Strategy for a sequence of failed writes: `(entity index, method, payload)`.
pub fn failure_sequence_strategy(entities: usize, max_len: usize) -> impl Strategy<Value = Vec<(usize, Method, Attributes)>> {
    prop::collection::vec(
        (0..entities.max(1), write_method_strategy(), attributes_strategy()),
        0..max_len,
    )
}
