//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, property values and record ids that
//! respect the engine's invariants (valid record ids, sorted multi-key
//! parts are produced by the key constructor itself).

use nodestore_core::{Key, NodeRecord, Value};
use nodestore_core::record::PropertyRecord;
use proptest::prelude::*;

/// Strategy for ids accepted by the backing stores.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[1-9][0-9]{0,8}").expect("Invalid regex")
}

/// Strategy for prototype names.
pub fn prototype_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for property names.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

fn storage_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"))
}

/// Strategy for primary keys, embedded or relational.
pub fn db_key_strategy() -> impl Strategy<Value = Key> {
    (storage_strategy(), record_id_strategy()).prop_map(|(storage, id)| Key::db(storage.as_deref(), id))
}

/// Strategy for any key shape, with synthetic keys nested up to three deep.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let multi = (
        storage_strategy(),
        prop::collection::vec(("[A-Z]{1,6}", "[a-z0-9]{0,6}"), 1..4),
    )
        .prop_map(|(storage, parts)| Key::multi(storage.as_deref(), parts));
    let leaf = prop_oneof![db_key_strategy(), multi];
    leaf.prop_recursive(3, 8, 1, |inner| {
        (inner, "[a-z]{1,8}").prop_map(|(parent, name)| Key::synthetic(parent, name))
    })
}

/// Strategy for property values of every kind.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        ".{0,32}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        (0i64..4_102_444_800_000).prop_map(Value::Date),
        db_key_strategy().prop_map(Value::Node),
    ]
}

/// Strategy for whole node records.
pub fn record_strategy() -> impl Strategy<Value = NodeRecord> {
    (
        record_id_strategy(),
        prototype_strategy(),
        any::<u32>(),
        prop::collection::btree_map(property_name_strategy(), value_strategy(), 0..8),
        prop::collection::vec(db_key_strategy(), 0..4),
    )
        .prop_map(|(id, prototype, ts, props, subnodes)| NodeRecord {
            name: id.clone(),
            id,
            prototype,
            created: i64::from(ts),
            last_modified: i64::from(ts),
            parent: None,
            subnodes,
            properties: props
                .into_iter()
                .map(|(name, value)| PropertyRecord { name, value })
                .collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodestore_storage::validate_record_id;

    proptest! {
        #[test]
        fn record_ids_are_valid(id in record_id_strategy()) {
            prop_assert!(validate_record_id(&id).is_ok());
        }

        #[test]
        fn synthetic_keys_are_not_primary(key in key_strategy()) {
            if key.parent().is_some() {
                prop_assert!(!key.is_primary());
            }
        }

        #[test]
        fn records_decode_to_themselves(record in record_strategy()) {
            let bytes = record.encode().unwrap();
            let back = NodeRecord::decode(&bytes).unwrap();
            prop_assert_eq!(back, record);
        }
    }
}
