//! Keys identifying nodes in the cache and in storage.
//!
//! One logical node may be reachable under several keys: always its primary
//! [`DbKey`], and possibly a [`SyntheticKey`] (parent + accessor name) or a
//! [`MultiKey`] (column/value tuple). The cache keeps these slots coherent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key: storage name plus id.
///
/// Embedded nodes have no storage name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbKey {
    /// Storage (table mapping) name, `None` for the embedded store.
    pub storage: Option<String>,
    /// Primary id.
    pub id: String,
}

/// Derived key: a named child of another node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyntheticKey {
    /// Key of the parent node.
    pub parent: Box<Key>,
    /// Accessor name under the parent.
    pub name: String,
}

/// Multi-column key: storage name plus column/value parts.
///
/// Parts are kept sorted by column so equal tuples hash equally regardless
/// of construction order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MultiKey {
    /// Storage (table mapping) name.
    pub storage: Option<String>,
    /// Sorted `(column, value)` pairs.
    pub parts: Vec<(String, String)>,
}

/// Any key shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Primary key.
    Db(DbKey),
    /// Parent + name.
    Synthetic(SyntheticKey),
    /// Column/value tuple.
    Multi(MultiKey),
}

impl Key {
    /// Creates a primary key.
    pub fn db(storage: Option<&str>, id: impl Into<String>) -> Self {
        Self::Db(DbKey {
            storage: storage.map(str::to_string),
            id: id.into(),
        })
    }

    /// Creates a primary key for the embedded store.
    pub fn embedded(id: impl Into<String>) -> Self {
        Self::db(None, id)
    }

    /// Creates a synthetic key under `parent`.
    pub fn synthetic(parent: Key, name: impl Into<String>) -> Self {
        Self::Synthetic(SyntheticKey {
            parent: Box::new(parent),
            name: name.into(),
        })
    }

    /// Creates a multi-column key. Parts are sorted by column.
    pub fn multi(storage: Option<&str>, mut parts: Vec<(String, String)>) -> Self {
        parts.sort();
        Self::Multi(MultiKey {
            storage: storage.map(str::to_string),
            parts,
        })
    }

    /// Returns the id for key shapes that carry one.
    ///
    /// `DbKey` yields its id, `SyntheticKey` its name; `MultiKey` has none.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Db(k) => Some(&k.id),
            Self::Synthetic(k) => Some(&k.name),
            Self::Multi(_) => None,
        }
    }

    /// Returns the storage name, if any.
    ///
    /// Synthetic keys have no storage of their own.
    #[must_use]
    pub fn storage(&self) -> Option<&str> {
        match self {
            Self::Db(k) => k.storage.as_deref(),
            Self::Multi(k) => k.storage.as_deref(),
            Self::Synthetic(_) => None,
        }
    }

    /// Returns true for primary (`DbKey`) keys.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        matches!(self, Self::Db(_))
    }

    /// Returns the parent key of a synthetic key.
    #[must_use]
    pub fn parent(&self) -> Option<&Key> {
        match self {
            Self::Synthetic(k) => Some(&k.parent),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Db(k) => match &k.storage {
                Some(s) => write!(f, "{s}[{}]", k.id),
                None => write!(f, "[{}]", k.id),
            },
            Self::Synthetic(k) => write!(f, "{}/{}", k.parent, k.name),
            Self::Multi(k) => {
                write!(f, "{}{{", k.storage.as_deref().unwrap_or(""))?;
                for (i, (col, val)) in k.parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{col}={val}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<DbKey> for Key {
    fn from(key: DbKey) -> Self {
        Self::Db(key)
    }
}
