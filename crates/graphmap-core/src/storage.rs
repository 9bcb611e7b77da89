//! The storage collaborator.
//!
//! The engine never talks to a database directly. Everything it reads and
//! writes goes through a [`Storage`] implementation: datasets in, attribute
//! rows out, records written one at a time inside a transaction.

use crate::dataset::Dataset;
use crate::error::{Result, StorageError};
use crate::record::Record;
use crate::value::Attributes;

/// A relational store the engine can read from and write to.
///
/// Implementations must be shareable across the owning thread's traversals;
/// the engine holds them behind `Arc<dyn Storage>`.
pub trait Storage: Send + Sync {
    /// Run the dataset and return every matching row.
    fn fetch(&self, dataset: &Dataset) -> std::result::Result<Vec<Attributes>, StorageError>;

    /// Count the rows matching the dataset.
    fn count(&self, dataset: &Dataset) -> std::result::Result<usize, StorageError> {
        self.fetch(dataset).map(|rows| rows.len())
    }

    /// Check whether no row matches the dataset.
    fn is_empty(&self, dataset: &Dataset) -> std::result::Result<bool, StorageError> {
        self.count(&dataset.clone().limit(1)).map(|n| n == 0)
    }

    /// Delete every row matching the dataset, returning how many went.
    fn delete_matching(&self, dataset: &Dataset) -> std::result::Result<usize, StorageError>;

    /// Insert the record, or merge its attributes into the existing row with
    /// the same identity.
    fn upsert(&self, record: &Record) -> std::result::Result<(), StorageError>;

    /// Delete the row with the record's identity. Deleting a missing row is
    /// not an error.
    fn delete(&self, record: &Record) -> std::result::Result<(), StorageError>;

    /// Run `work` atomically.
    ///
    /// If `work` fails every write it made is rolled back and its error is
    /// returned unchanged. A failure to begin or commit is reported as
    /// [`crate::Error::Storage`].
    fn transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}
