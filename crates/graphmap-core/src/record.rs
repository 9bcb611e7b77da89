//! Namespaced attribute records produced for every write.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::value::{Attributes, Value};

/// Whether a record is written or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Insert the row, or merge into the existing row with the same identity.
    Upsert,
    /// Remove the row with this identity.
    Delete,
}

/// One row-to-be-written: a namespaced bag of attributes with an identity.
///
/// Records are values. Methods that change a record return a new one.
/// Equality and hashing consider the kind, the namespace and the attributes;
/// the depth is only an ordering hint and is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    namespace: String,
    primary_key: Vec<String>,
    attributes: Attributes,
    depth: i32,
    kind: RecordKind,
}

impl Record {
    /// Create a record of the given kind.
    pub fn new<I, S>(
        kind: RecordKind,
        namespace: impl Into<String>,
        primary_key: I,
        attributes: Attributes,
        depth: i32,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            attributes,
            depth,
            kind,
        }
    }

    /// Create an upsert record.
    pub fn upsert<I, S>(
        namespace: impl Into<String>,
        primary_key: I,
        attributes: Attributes,
        depth: i32,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RecordKind::Upsert, namespace, primary_key, attributes, depth)
    }

    /// Create a delete record.
    pub fn delete<I, S>(
        namespace: impl Into<String>,
        primary_key: I,
        attributes: Attributes,
        depth: i32,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RecordKind::Delete, namespace, primary_key, attributes, depth)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_delete(&self) -> bool {
        self.kind == RecordKind::Delete
    }

    pub fn is_upsert(&self) -> bool {
        self.kind == RecordKind::Upsert
    }

    /// Get a single attribute.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Check whether `field` is one of the primary key fields.
    pub fn is_key_field(&self, field: &str) -> bool {
        self.primary_key.iter().any(|k| k == field)
    }

    /// The attributes restricted to the primary key fields.
    pub fn identity(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(k, _)| self.is_key_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The primary key values in key order. Absent fields read as NULL.
    pub fn identity_values(&self) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|k| self.attributes.get(k).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// A copy with `other` merged over this record's attributes.
    #[must_use]
    pub fn merge(&self, other: &Attributes) -> Record {
        let mut attributes = self.attributes.clone();
        for (k, v) in other {
            attributes.insert(k.clone(), v.clone());
        }
        Record {
            attributes,
            ..self.clone()
        }
    }

    /// A copy without the non-key attributes for which `predicate` holds.
    ///
    /// Identity fields are always kept.
    #[must_use]
    pub fn reject(&self, mut predicate: impl FnMut(&str, &Value) -> bool) -> Record {
        let attributes = self
            .attributes
            .iter()
            .filter(|(k, v)| self.is_key_field(k) || !predicate(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Record {
            attributes,
            ..self.clone()
        }
    }

    /// A copy with a different depth.
    #[must_use]
    pub fn with_depth(&self, depth: i32) -> Record {
        Record {
            depth,
            ..self.clone()
        }
    }

    /// A delete record for the same row.
    #[must_use]
    pub fn to_delete(&self) -> Record {
        Record {
            kind: RecordKind::Delete,
            ..self.clone()
        }
    }

    /// Consume the record, returning its attributes.
    pub fn into_attributes(self) -> Attributes {
        self.attributes
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.namespace == other.namespace
            && self.attributes == other.attributes
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.namespace.hash(state);
        self.attributes.hash(state);
    }
}
