//! Property relations.

use super::DbMapping;
use crate::node::Node;
use crate::sql::SqlType;
use serde::{Deserialize, Serialize};

/// What a relation maps a property onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// A plain column value.
    #[default]
    Primitive,
    /// A single referenced node.
    Reference,
    /// A collection of child nodes.
    Collection,
}

/// Join condition between the home node and the related table.
///
/// The home side is either a column of the home table (`local`) or a fixed
/// value (`value`); `foreign` names the column of the related table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Column of the home table.
    #[serde(default)]
    pub local: Option<String>,
    /// Literal value, used instead of `local`.
    #[serde(default)]
    pub value: Option<String>,
    /// Column of the related table.
    pub foreign: String,
}

impl Constraint {
    /// Creates a column-to-column constraint.
    pub fn columns(local: impl Into<String>, foreign: impl Into<String>) -> Self {
        Self {
            local: Some(local.into()),
            value: None,
            foreign: foreign.into(),
        }
    }

    /// Creates a constraint against a literal value.
    pub fn literal(value: impl Into<String>, foreign: impl Into<String>) -> Self {
        Self {
            local: None,
            value: Some(value.into()),
            foreign: foreign.into(),
        }
    }

    /// Resolves the home-side value for `home`.
    #[must_use]
    pub fn home_value(&self, home_mapping: &DbMapping, home: &Node) -> Option<String> {
        if let Some(v) = &self.value {
            return Some(v.clone());
        }
        self.local
            .as_deref()
            .and_then(|col| home_mapping.column_value(home, col))
    }
}

/// Describes how a property of one prototype maps onto storage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Relation {
    /// Property name on the owning prototype.
    #[serde(skip)]
    pub prop_name: String,
    /// Owning prototype.
    #[serde(skip)]
    pub own_type: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Column on the owning table (primitives and plain references).
    pub column: Option<String>,
    /// Declared type of `column`.
    pub sql_type: SqlType,
    /// Prototype of the related node(s).
    pub other_type: Option<String>,
    /// Column of the related table used to address children by name.
    pub accessor: Option<String>,
    /// Column of the related table used to group children.
    pub group_by: Option<String>,
    /// Prototype of the generated group nodes.
    pub group_prototype: Option<String>,
    /// `ORDER BY` clause for child listings.
    pub order: Option<String>,
    /// Join conditions between home and related table.
    pub constraints: Vec<Constraint>,
    /// Never written back.
    pub readonly: bool,
    /// Related node is virtual (never persisted).
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Changes do not bump the data watermark.
    pub private: bool,
    /// Maximum number of children loaded (0 means unlimited).
    pub max_size: usize,
    /// Prototype for virtual nodes created by this relation.
    pub prototype: Option<String>,
    /// Load the referenced node in the same query via an outer join.
    pub join: bool,
}

impl Relation {
    /// Creates a primitive relation onto `column`.
    pub fn primitive(column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            column: Some(column.into()),
            sql_type,
            ..Self::default()
        }
    }

    /// Creates a reference relation stored in `column`.
    pub fn reference(column: impl Into<String>, other_type: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Reference,
            column: Some(column.into()),
            sql_type: SqlType::Integer,
            other_type: Some(other_type.into()),
            ..Self::default()
        }
    }

    /// Creates a collection relation of `other_type` children.
    pub fn collection(other_type: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Collection,
            other_type: Some(other_type.into()),
            ..Self::default()
        }
    }

    /// Adds a join condition.
    #[must_use]
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Sets the accessor column.
    #[must_use]
    pub fn accessor(mut self, column: impl Into<String>) -> Self {
        self.accessor = Some(column.into());
        self
    }

    /// Sets the group-by column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by = Some(column.into());
        self
    }

    /// Sets the order clause.
    #[must_use]
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Sets the maximum child count.
    #[must_use]
    pub const fn max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    /// Marks the relation read-only.
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Marks the relation private.
    #[must_use]
    pub const fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Marks the related node virtual, with the given prototype.
    #[must_use]
    pub fn virtual_node(mut self, prototype: impl Into<String>) -> Self {
        self.is_virtual = true;
        self.prototype = Some(prototype.into());
        self
    }

    /// Requests an outer join for this reference.
    #[must_use]
    pub const fn joined(mut self) -> Self {
        self.join = true;
        self
    }

    /// Returns true if children are addressed by their primary key.
    #[must_use]
    pub fn uses_primary_key(&self) -> bool {
        self.accessor.is_none() && self.group_by.is_none() && !self.is_virtual
    }

    /// Returns true for references resolved through constraints rather
    /// than a column of the home table.
    #[must_use]
    pub fn is_complex_reference(&self) -> bool {
        self.kind == RelationKind::Reference && self.column.is_none() && !self.constraints.is_empty()
    }

    /// Returns true if nodes reached via this relation get synthetic keys.
    #[must_use]
    pub fn create_on_demand(&self) -> bool {
        self.is_virtual || self.group_by.is_some() || !self.uses_primary_key()
    }

    /// Returns true if the property is written to a column.
    #[must_use]
    pub fn is_column_backed(&self) -> bool {
        self.column.is_some()
            && matches!(self.kind, RelationKind::Primitive | RelationKind::Reference)
    }

    /// Returns true if a dirty value of this relation is written on update.
    #[must_use]
    pub fn is_updatable(&self) -> bool {
        self.is_column_backed() && !self.readonly && !self.is_virtual
    }

    /// Returns the `(foreign column, value)` parts identifying the related
    /// node of a complex reference from `home`.
    #[must_use]
    pub fn key_parts(&self, home_mapping: &DbMapping, home: &Node) -> Vec<(String, String)> {
        self.constraints
            .iter()
            .map(|c| {
                (
                    c.foreign.clone(),
                    c.home_value(home_mapping, home).unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Returns true if `node` satisfies every constraint relative to `home`.
    #[must_use]
    pub fn check_constraints(
        &self,
        home_mapping: &DbMapping,
        home: &Node,
        other_mapping: &DbMapping,
        node: &Node,
    ) -> bool {
        self.constraints.iter().all(|c| {
            let local = c.home_value(home_mapping, home);
            let foreign = other_mapping.column_value(node, &c.foreign);
            local == foreign
        })
    }

    /// Derives the relation listing the children of one group.
    ///
    /// Home constraints are frozen to literals, and the group column is
    /// pinned to `group`.
    #[must_use]
    pub fn for_group(&self, home_mapping: &DbMapping, home: &Node, group: &str) -> Self {
        let mut constraints: Vec<_> = self
            .constraints
            .iter()
            .map(|c| Constraint {
                local: None,
                value: c.home_value(home_mapping, home),
                foreign: c.foreign.clone(),
            })
            .collect();
        if let Some(col) = &self.group_by {
            constraints.push(Constraint::literal(group, col.clone()));
        }
        Self {
            group_by: None,
            group_prototype: None,
            constraints,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        let plain = Relation::collection("person");
        assert!(plain.uses_primary_key());
        assert!(!plain.create_on_demand());

        let named = Relation::collection("person").accessor("NAME");
        assert!(!named.uses_primary_key());
        assert!(named.create_on_demand());

        let grouped = Relation::collection("person").group_by("CITY");
        assert!(grouped.create_on_demand());

        let complex = Relation {
            kind: RelationKind::Reference,
            other_type: Some("address".into()),
            ..Relation::default()
        }
        .constraint(Constraint::columns("ID", "PERSON_ID"));
        assert!(complex.is_complex_reference());

        let simple = Relation::reference("EMPLOYER_ID", "company");
        assert!(!simple.is_complex_reference());
        assert!(simple.is_updatable());
        assert!(!simple.clone().readonly().is_updatable());
    }

    #[test]
    fn deserializes_with_defaults() {
        let rel: Relation = serde_json::from_str(
            r#"{"kind": "collection", "other_type": "person", "accessor": "NAME", "virtual": false}"#,
        )
        .unwrap();
        assert_eq!(rel.kind, RelationKind::Collection);
        assert_eq!(rel.accessor.as_deref(), Some("NAME"));
        assert_eq!(rel.sql_type, SqlType::Varchar);
        assert_eq!(rel.max_size, 0);
    }
}
