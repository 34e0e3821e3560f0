//! Serialized node records.
//!
//! Records are the unit the embedded store and replication move around:
//! a node's identity, timestamps, structure and property tree, encoded as
//! CBOR.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::node::Value;
use serde::{Deserialize, Serialize};

/// One property in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: Value,
}

/// Serializable form of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id.
    pub id: String,
    /// Node name.
    pub name: String,
    /// Prototype name.
    pub prototype: String,
    /// Creation time (ms).
    pub created: i64,
    /// Last modification time (ms).
    pub last_modified: i64,
    /// Parent key.
    #[serde(default)]
    pub parent: Option<Key>,
    /// Ordered child keys.
    #[serde(default)]
    pub subnodes: Vec<Key>,
    /// Properties.
    #[serde(default)]
    pub properties: Vec<PropertyRecord>,
}

impl NodeRecord {
    /// Encodes the record as CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a record from CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a valid record.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Returns the value of a property (case-insensitive).
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeRecord {
        NodeRecord {
            id: "12".into(),
            name: "about".into(),
            prototype: "page".into(),
            created: 1_000,
            last_modified: 2_000,
            parent: Some(Key::embedded("0")),
            subnodes: vec![Key::embedded("13")],
            properties: vec![
                PropertyRecord {
                    name: "Title".into(),
                    value: Value::from("About us"),
                },
                PropertyRecord {
                    name: "meta".into(),
                    value: Value::Object(serde_json::json!({"tags": ["a", "b"]})),
                },
                PropertyRecord {
                    name: "author".into(),
                    value: Value::Node(Key::db(Some("person"), "4")),
                },
            ],
        }
    }

    #[test]
    fn cbor_round_trip() {
        let record = sample();
        let bytes = record.encode().unwrap();
        assert_eq!(NodeRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn decode_garbage_fails() {
        let err = NodeRecord::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CoreError::Codec { .. }));
    }

    #[test]
    fn property_lookup_ignores_case() {
        let record = sample();
        assert_eq!(record.property("TITLE"), Some(&Value::from("About us")));
        assert_eq!(record.property("missing"), None);
    }
}
