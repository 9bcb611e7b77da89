//! Snapshot-based dirty detection.
//!
//! The dirty map remembers, per `(namespace, primary key)`, the attributes as
//! they were last loaded or saved. A record is compared against its snapshot
//! field by field to decide whether it needs writing and, if so, which fields.

use std::collections::HashMap;

use graphmap_core::{Attributes, Record};

use crate::identity_map::IdentityKey;

/// Baseline attribute snapshots, scoped to one store façade.
#[derive(Debug, Default)]
pub struct DirtyMap {
    snapshots: HashMap<IdentityKey, Attributes>,
}

fn key_of(record: &Record) -> IdentityKey {
    IdentityKey::new(record.namespace(), record.identity_values())
}

impl DirtyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `record`'s attributes as its baseline, replacing any
    /// previous snapshot. Returns the record unchanged.
    #[tracing::instrument(level = "trace", skip(self, record), fields(namespace = record.namespace()))]
    pub fn load<'r>(&mut self, record: &'r Record) -> &'r Record {
        self.snapshots
            .insert(key_of(record), record.attributes().clone());
        record
    }

    /// Does `record` need writing?
    ///
    /// New records (no snapshot) and deletes always do. Otherwise a record is
    /// dirty iff one of its attributes is absent from, or different in, the
    /// snapshot. A record carrying only a subset of the snapshot's fields is
    /// clean as long as those fields match.
    pub fn is_dirty(&self, record: &Record) -> bool {
        if record.is_delete() {
            return true;
        }
        let dirty = match self.snapshots.get(&key_of(record)) {
            None => true,
            Some(snapshot) => record
                .attributes()
                .iter()
                .any(|(k, v)| snapshot.get(k) != Some(v)),
        };
        tracing::trace!(namespace = record.namespace(), dirty, "dirty check");
        dirty
    }

    /// Names of the attributes that differ from the snapshot; every attribute
    /// when there is no snapshot.
    pub fn changed_fields(&self, record: &Record) -> Vec<String> {
        let snapshot = self.snapshots.get(&key_of(record));
        record
            .attributes()
            .iter()
            .filter(|(k, v)| snapshot.is_none_or(|s| s.get(*k) != Some(*v)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// A copy of `record` holding only its identity plus changed attributes.
    ///
    /// Without a snapshot the record is returned whole.
    pub fn reject_unchanged_fields(&self, record: &Record) -> Record {
        match self.snapshots.get(&key_of(record)) {
            None => record.clone(),
            Some(snapshot) => record.reject(|k, v| snapshot.get(k) == Some(v)),
        }
    }

    /// Merge a successfully written record into its snapshot.
    #[tracing::instrument(level = "trace", skip(self, record), fields(namespace = record.namespace()))]
    pub fn refresh(&mut self, record: &Record) {
        let snapshot = self.snapshots.entry(key_of(record)).or_default();
        for (k, v) in record.attributes() {
            snapshot.insert(k.clone(), v.clone());
        }
    }

    /// Drop the snapshot for `record`'s identity.
    pub fn forget(&mut self, record: &Record) -> Option<Attributes> {
        self.snapshots.remove(&key_of(record))
    }

    pub fn forget_key(&mut self, key: &IdentityKey) -> Option<Attributes> {
        self.snapshots.remove(key)
    }

    pub fn has_snapshot(&self, record: &Record) -> bool {
        self.snapshots.contains_key(&key_of(record))
    }

    pub fn snapshot(&self, key: &IdentityKey) -> Option<&Attributes> {
        self.snapshots.get(key)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmap_core::Value;

    fn post(pairs: &[(&str, &str)]) -> Record {
        let attrs = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect();
        Record::upsert("posts", ["id"], attrs, 0)
    }

    #[test]
    fn unknown_records_are_dirty() {
        let map = DirtyMap::new();
        assert!(map.is_dirty(&post(&[("id", "p1")])));
    }

    #[test]
    fn loaded_record_is_clean_until_changed() {
        let mut map = DirtyMap::new();
        map.load(&post(&[("id", "p1"), ("subject", "Hello")]));

        assert!(!map.is_dirty(&post(&[("id", "p1"), ("subject", "Hello")])));
        assert!(map.is_dirty(&post(&[("id", "p1"), ("subject", "Bye")])));
    }

    #[test]
    fn subset_is_clean_superset_is_dirty() {
        let mut map = DirtyMap::new();
        map.load(&post(&[("id", "p1"), ("subject", "Hello"), ("body", "...")]));

        assert!(!map.is_dirty(&post(&[("id", "p1"), ("subject", "Hello")])));
        assert!(map.is_dirty(&post(&[("id", "p1"), ("subject", "Hello"), ("tag", "x")])));
    }

    #[test]
    fn deletes_are_always_dirty() {
        let mut map = DirtyMap::new();
        let record = post(&[("id", "p1")]);
        map.load(&record);
        assert!(map.is_dirty(&record.to_delete()));
    }

    #[test]
    fn snapshot_is_isolated_from_later_changes() {
        let mut map = DirtyMap::new();
        let mut attrs = post(&[("id", "p1"), ("subject", "Hello")]).into_attributes();
        let record = Record::upsert("posts", ["id"], attrs.clone(), 0);
        map.load(&record);

        if let Some(Value::Text(subject)) = attrs.get_mut("subject") {
            subject.push_str(", world");
        }
        assert!(map.is_dirty(&Record::upsert("posts", ["id"], attrs, 0)));
    }

    #[test]
    fn reject_unchanged_keeps_identity_and_changes() {
        let mut map = DirtyMap::new();
        map.load(&post(&[("id", "p1"), ("subject", "Hello"), ("author_id", "u1")]));

        let edited = post(&[("id", "p1"), ("subject", "Bye"), ("author_id", "u1")]);
        let minimal = map.reject_unchanged_fields(&edited);

        assert_eq!(minimal, post(&[("id", "p1"), ("subject", "Bye")]));
        assert_eq!(map.changed_fields(&edited), vec!["subject".to_string()]);
    }

    #[test]
    fn reject_without_snapshot_keeps_everything() {
        let map = DirtyMap::new();
        let record = post(&[("id", "p1"), ("subject", "Hello")]);
        assert_eq!(map.reject_unchanged_fields(&record), record);
        assert_eq!(map.changed_fields(&record).len(), 2);
    }

    #[test]
    fn refresh_merges_and_forget_drops() {
        let mut map = DirtyMap::new();
        map.load(&post(&[("id", "p1"), ("subject", "Hello"), ("body", "...")]));
        map.refresh(&post(&[("id", "p1"), ("subject", "Bye")]));

        assert!(!map.is_dirty(&post(&[("id", "p1"), ("subject", "Bye"), ("body", "...")])));

        map.forget(&post(&[("id", "p1")]));
        assert!(!map.has_snapshot(&post(&[("id", "p1")])));
        assert!(map.is_empty());
    }
}
