//! Identity Map: one in-memory object per row within a traversal.
//!
//! Two association paths that reach the same `(namespace, primary key)` within
//! one traversal must yield the very same object, so mutations made through
//! one path are visible through the other.
//!
//! Entries are weak. The map never keeps an object alive on its own; once the
//! caller drops every handle the entry is dead and a later load builds a
//! fresh object.

use std::collections::HashMap;

use graphmap_core::{Attributes, Result, Value};

use crate::node::{Node, WeakNode};

/// Key of an identity map or dirty map entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    namespace: String,
    values: Vec<Value>,
}

impl IdentityKey {
    pub fn new(namespace: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            namespace: namespace.into(),
            values,
        }
    }

    /// Build a key from a row. `None` if any key field is missing or NULL,
    /// since such a row has no identity yet.
    pub fn from_attributes(
        namespace: &str,
        primary_key: &[String],
        attributes: &Attributes,
    ) -> Option<Self> {
        let values = primary_key
            .iter()
            .map(|k| attributes.get(k).filter(|v| !v.is_null()).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(namespace, values))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Traversal-scoped cache of constructed objects.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, WeakNode>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the object stored under `key`, or build, store and return one.
    ///
    /// `create` runs at most once per live identity. If it fails nothing is
    /// stored.
    pub fn get_or_create(
        &mut self,
        key: IdentityKey,
        create: impl FnOnce() -> Result<Node>,
    ) -> Result<Node> {
        if let Some(node) = self.get(&key) {
            return Ok(node);
        }
        let node = create()?;
        self.entries.insert(key, node.downgrade());
        Ok(node)
    }

    /// Store `node` unless a live object already holds the key; return
    /// whichever object ends up stored.
    pub fn insert_if_absent(&mut self, key: IdentityKey, node: Node) -> Node {
        if let Some(existing) = self.get(&key) {
            tracing::trace!(namespace = key.namespace(), "identity already claimed");
            return existing;
        }
        self.entries.insert(key, node.downgrade());
        node
    }

    /// The live object stored under `key`.
    pub fn get(&self, key: &IdentityKey) -> Option<Node> {
        self.entries.get(key).and_then(WeakNode::upgrade)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &IdentityKey) -> Option<Node> {
        self.entries.remove(key).and_then(|weak| weak.upgrade())
    }

    /// Drop entries whose objects are gone. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.upgrade().is_some());
        before - self.entries.len()
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
