//! In-memory storage driver for graphmap.
//!
//! [`MemoryStorage`] implements [`Storage`] over plain vectors of attribute
//! rows. It understands every [`Dataset`] feature, runs transactions by
//! snapshotting its tables, and records everything it is asked to do so tests
//! can assert on the exact queries and writes the engine issued.
//!
//! ```
//! use graphmap_core::{Dataset, Storage, Value};
//! use graphmap_memory::MemoryStorage;
//!
//! let storage = MemoryStorage::new();
//! storage.insert_row("users", [("id", Value::from("u1")), ("name", Value::from("Ada"))]);
//!
//! let rows = storage.fetch(&Dataset::new("users").where_eq("id", "u1")).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(storage.query_count(), 1);
//! ```

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use graphmap_core::{
    Attributes, Dataset, Direction, Record, Result, Storage, StorageError, StorageErrorKind,
    Value,
};
use parking_lot::ReentrantMutex;

#[derive(Debug, Default, Clone)]
struct Tables {
    rows: BTreeMap<String, Vec<Attributes>>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    log: Vec<Record>,
    queries: usize,
    failing: HashSet<String>,
}

/// An in-memory relational store.
///
/// # Thread Safety
///
/// All state sits behind a re-entrant lock, so writes issued from inside
/// [`Storage::transaction`] on the same thread do not deadlock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: ReentrantMutex<RefCell<State>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row without going through the write log.
    pub fn insert_row<I, K>(&self, namespace: &str, row: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let row: Attributes = row.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let guard = self.state.lock();
        guard
            .borrow_mut()
            .tables
            .rows
            .entry(namespace.to_string())
            .or_default()
            .push(row);
    }

    /// Returns a copy of every row in `namespace`, in insertion order.
    #[must_use]
    pub fn rows(&self, namespace: &str) -> Vec<Attributes> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .tables
            .rows
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of reads (`fetch`/`count`) served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.state.lock().borrow().queries
    }

    /// Resets the read counter.
    pub fn reset_query_count(&self) {
        self.state.lock().borrow_mut().queries = 0;
    }

    /// Every committed write, in the order it was issued.
    #[must_use]
    pub fn writes(&self) -> Vec<Record> {
        self.state.lock().borrow().log.clone()
    }

    /// Committed writes against one namespace.
    #[must_use]
    pub fn writes_to(&self, namespace: &str) -> Vec<Record> {
        self.state
            .lock()
            .borrow()
            .log
            .iter()
            .filter(|r| r.namespace() == namespace)
            .cloned()
            .collect()
    }

    /// Forgets the write log and the read counter.
    pub fn clear_log(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.log.clear();
        state.queries = 0;
    }

    /// Makes every subsequent write to `namespace` fail with a constraint error.
    pub fn fail_writes_to(&self, namespace: &str) {
        self.state
            .lock()
            .borrow_mut()
            .failing
            .insert(namespace.to_string());
    }

    /// Undoes [`MemoryStorage::fail_writes_to`] for every namespace.
    pub fn stop_failing(&self) {
        self.state.lock().borrow_mut().failing.clear();
    }

    fn check_writable(state: &State, namespace: &str) -> std::result::Result<(), StorageError> {
        if state.failing.contains(namespace) {
            return Err(StorageError::new(
                StorageErrorKind::Constraint,
                format!("writes to '{namespace}' are rejected"),
            ));
        }
        Ok(())
    }
}

/// Does `row` carry the record's identity?
fn has_identity(row: &Attributes, record: &Record) -> bool {
    record
        .primary_key()
        .iter()
        .all(|k| match (row.get(k), record.get(k)) {
            (Some(a), Some(b)) => !a.is_null() && a == b,
            _ => false,
        })
}

/// Total order used for `ORDER BY`. NULL sorts first, numbers compare
/// numerically, text lexically, anything else by its rendering.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return x.cmp(&y);
            }
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.total_cmp(&y);
            }
            if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                return x.cmp(y);
            }
            a.to_string().cmp(&b.to_string())
        }
    }
}

fn compare_rows(a: &Attributes, b: &Attributes, dataset: &Dataset) -> Ordering {
    for term in dataset.order() {
        let left = a.get(&term.field).unwrap_or(&Value::Null);
        let right = b.get(&term.field).unwrap_or(&Value::Null);
        let ord = match term.direction {
            Direction::Asc => compare_values(left, right),
            Direction::Desc => compare_values(right, left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn project(row: &Attributes, columns: Option<&[String]>) -> Attributes {
    match columns {
        None => row.clone(),
        Some(columns) => row
            .iter()
            .filter(|(k, _)| columns.iter().any(|c| c == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

impl Storage for MemoryStorage {
    #[tracing::instrument(level = "trace", skip(self), fields(namespace = dataset.namespace()))]
    fn fetch(&self, dataset: &Dataset) -> std::result::Result<Vec<Attributes>, StorageError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.queries += 1;

        let mut matched: Vec<&Attributes> = state
            .tables
            .rows
            .get(dataset.namespace())
            .map(|rows| rows.iter().filter(|row| dataset.matches(row)).collect())
            .unwrap_or_default();
        // Stable sort keeps insertion order among equal keys.
        matched.sort_by(|a, b| compare_rows(a, b, dataset));
        if let Some(limit) = dataset.row_limit() {
            matched.truncate(limit);
        }

        let rows: Vec<Attributes> = matched
            .into_iter()
            .map(|row| project(row, dataset.columns()))
            .collect();
        tracing::trace!(rows = rows.len(), "fetched");
        Ok(rows)
    }

    fn count(&self, dataset: &Dataset) -> std::result::Result<usize, StorageError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.queries += 1;

        let n = state
            .tables
            .rows
            .get(dataset.namespace())
            .map_or(0, |rows| rows.iter().filter(|row| dataset.matches(row)).count());
        Ok(dataset.row_limit().map_or(n, |limit| n.min(limit)))
    }

    fn delete_matching(&self, dataset: &Dataset) -> std::result::Result<usize, StorageError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Self::check_writable(&state, dataset.namespace())?;

        let Some(rows) = state.tables.rows.get_mut(dataset.namespace()) else {
            return Ok(0);
        };
        let (gone, kept): (Vec<Attributes>, Vec<Attributes>) =
            rows.drain(..).partition(|row| dataset.matches(row));
        *rows = kept;

        let n = gone.len();
        for row in gone {
            state
                .log
                .push(Record::delete(dataset.namespace(), Vec::<String>::new(), row, 0));
        }
        tracing::debug!(namespace = dataset.namespace(), deleted = n, "delete_matching");
        Ok(n)
    }

    fn upsert(&self, record: &Record) -> std::result::Result<(), StorageError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Self::check_writable(&state, record.namespace())?;

        let rows = state
            .tables
            .rows
            .entry(record.namespace().to_string())
            .or_default();
        if let Some(existing) = rows.iter_mut().find(|row| has_identity(row, record)) {
            for (k, v) in record.attributes() {
                existing.insert(k.clone(), v.clone());
            }
        } else {
            rows.push(record.attributes().clone());
        }
        state.log.push(record.clone());
        Ok(())
    }

    fn delete(&self, record: &Record) -> std::result::Result<(), StorageError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Self::check_writable(&state, record.namespace())?;

        if let Some(rows) = state.tables.rows.get_mut(record.namespace()) {
            rows.retain(|row| !has_identity(row, record));
        }
        state.log.push(record.clone());
        Ok(())
    }

    fn transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        // Held for the whole unit so other threads cannot interleave.
        let guard = self.state.lock();
        let (snapshot, log_len) = {
            let state = guard.borrow();
            (state.tables.clone(), state.log.len())
        };

        match work() {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = guard.borrow_mut();
                state.tables = snapshot;
                state.log.truncate(log_len);
                tracing::debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmap_core::Error;

    fn user(id: &str, name: &str) -> [(&'static str, Value); 2] {
        [("id", Value::from(id)), ("name", Value::from(name))]
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn fetch_filters_orders_and_limits() {
        let storage = MemoryStorage::new();
        storage.insert_row("users", user("u2", "Bob"));
        storage.insert_row("users", user("u1", "Ada"));
        storage.insert_row("users", user("u3", "Cy"));

        let rows = storage
            .fetch(
                &Dataset::new("users")
                    .where_in("id", ["u1", "u2"])
                    .order_by("name", Direction::Asc)
                    .limit(1),
            )
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Ada")));
        assert_eq!(storage.query_count(), 1);
    }

    #[test]
    fn fetch_projects_columns() {
        let storage = MemoryStorage::new();
        storage.insert_row("users", user("u1", "Ada"));

        let rows = storage
            .fetch(&Dataset::new("users").select(["id"]))
            .unwrap();
        assert_eq!(rows[0], attrs(&[("id", Value::from("u1"))]));
    }

    #[test]
    fn upsert_inserts_then_merges() {
        let storage = MemoryStorage::new();
        let insert = Record::upsert("users", ["id"], attrs(&user("u1", "Ada")), 0);
        storage.upsert(&insert).unwrap();

        let update = Record::upsert(
            "users",
            ["id"],
            attrs(&[("id", Value::from("u1")), ("email", Value::from("a@x"))]),
            0,
        );
        storage.upsert(&update).unwrap();

        let rows = storage.rows("users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Ada")));
        assert_eq!(rows[0].get("email"), Some(&Value::from("a@x")));
        assert_eq!(storage.writes_to("users").len(), 2);
    }

    #[test]
    fn delete_removes_by_composite_identity() {
        let storage = MemoryStorage::new();
        storage.insert_row(
            "posts_tags",
            [("post_id", Value::from("p1")), ("tag_id", Value::from("t1"))],
        );
        storage.insert_row(
            "posts_tags",
            [("post_id", Value::from("p1")), ("tag_id", Value::from("t2"))],
        );

        let record = Record::delete(
            "posts_tags",
            ["post_id", "tag_id"],
            attrs(&[("post_id", Value::from("p1")), ("tag_id", Value::from("t1"))]),
            0,
        );
        storage.delete(&record).unwrap();

        let rows = storage.rows("posts_tags");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("tag_id"), Some(&Value::from("t2")));
    }

    #[test]
    fn failed_transaction_restores_tables_and_log() {
        let storage = MemoryStorage::new();
        storage.insert_row("users", user("u1", "Ada"));
        storage.fail_writes_to("posts");

        let result = storage.transaction(&mut || {
            storage.upsert(&Record::upsert("users", ["id"], attrs(&user("u1", "Eve")), 0))?;
            storage.upsert(&Record::upsert(
                "posts",
                ["id"],
                attrs(&[("id", Value::from("p1"))]),
                1,
            ))?;
            Ok(())
        });

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(storage.rows("users")[0].get("name"), Some(&Value::from("Ada")));
        assert!(storage.rows("posts").is_empty());
        assert!(storage.writes().is_empty());
    }

    #[test]
    fn count_and_delete_matching() {
        let storage = MemoryStorage::new();
        storage.insert_row("users", user("u1", "Ada"));
        storage.insert_row("users", user("u2", "Bob"));

        let all = Dataset::new("users");
        assert_eq!(storage.count(&all).unwrap(), 2);
        assert!(!storage.is_empty(&all).unwrap());

        let removed = storage
            .delete_matching(&Dataset::new("users").where_eq("name", "Bob"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.count(&all).unwrap(), 1);
    }

    #[test]
    fn nulls_sort_first() {
        assert_eq!(compare_values(&Value::Null, &Value::from(1)), Ordering::Less);
        assert_eq!(
            compare_values(&Value::from(2), &Value::from(10_i64)),
            Ordering::Less
        );
    }
}
