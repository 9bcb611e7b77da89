//! Core types for graphmap.
//!
//! This crate holds the pieces shared by the engine and storage adapters:
//!
//! - [`Value`] and [`Attributes`], the dynamic row representation
//! - [`Record`], one namespaced write with an identity and a depth
//! - [`Dataset`], an adapter-neutral query description
//! - [`Storage`], the collaborator trait every adapter implements
//! - [`Error`], the error type for every fallible operation

pub mod dataset;
pub mod error;
pub mod record;
pub mod storage;
pub mod value;

pub use dataset::{Criterion, Dataset, Direction, OrderBy};
pub use error::{
    BoxError, Error, LoadError, MappingError, MappingErrorKind, Result, SerializationError,
    StorageError, StorageErrorKind, TypeError, UpsertError,
};
pub use record::{Record, RecordKind};
pub use storage::Storage;
pub use value::{Attributes, Value};
