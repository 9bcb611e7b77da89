//! Error types for graphmap operations.

use std::fmt;

use crate::record::RecordKind;
use crate::value::Attributes;

/// Boxed error produced by user-supplied factories and serializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all graphmap operations.
#[derive(Debug)]
pub enum Error {
    /// A mapping factory failed to build an object from a row
    Load(LoadError),
    /// A mapping serializer failed on an object
    Serialization(SerializationError),
    /// The storage collaborator rejected a write
    Upsert(UpsertError),
    /// The storage collaborator failed a read or transaction
    Storage(StorageError),
    /// Mapping registry lookup or validation failure
    Mapping(MappingError),
    /// Value conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

/// A factory invocation failed for one row.
#[derive(Debug)]
pub struct LoadError {
    /// Name of the mapping whose factory failed.
    pub mapping: String,
    /// The row handed to the factory.
    pub row: Attributes,
    /// The underlying cause.
    pub source: BoxError,
}

/// A serializer invocation failed for one object.
#[derive(Debug)]
pub struct SerializationError {
    /// Name of the mapping whose serializer failed.
    pub mapping: String,
    /// The underlying cause.
    pub source: BoxError,
}

/// A write issued during `save`/`delete` failed.
#[derive(Debug)]
pub struct UpsertError {
    /// Namespace of the record being written.
    pub namespace: String,
    /// Identity (primary key attributes) of the record being written.
    pub identity: Attributes,
    /// Whether the failed write was an upsert or a delete.
    pub kind: RecordKind,
    /// The storage failure.
    pub source: StorageError,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A read could not be executed
    Query,
    /// A write violated a constraint
    Constraint,
    /// Transaction could not be started, committed or rolled back
    Transaction,
    /// The store is temporarily unavailable (retry may succeed)
    Unavailable,
    /// Anything else reported by the adapter
    Other,
}

#[derive(Debug, Clone)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No mapping registered under the requested name
    UnknownMapping,
    /// The mapping has no association with the requested name
    UnknownAssociation,
    /// The mapping has no named subset with the requested name
    UnknownSubset,
    /// Primary key is empty or names undeclared fields
    MissingPrimaryKey,
    /// Any other inconsistency in a mapping definition
    Invalid,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub field: Option<String>,
}

impl StorageError {
    /// Create a storage error without an underlying cause.
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl MappingError {
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_mapping(name: &str) -> Self {
        Self::new(
            MappingErrorKind::UnknownMapping,
            format!("no mapping registered as '{name}'"),
        )
    }

    pub fn unknown_association(mapping: &str, name: &str) -> Self {
        Self::new(
            MappingErrorKind::UnknownAssociation,
            format!("mapping '{mapping}' has no association '{name}'"),
        )
    }
}

impl Error {
    /// Is this a storage failure that a caller may retry?
    ///
    /// The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage(e) => e.kind == StorageErrorKind::Unavailable,
            Error::Upsert(e) => e.source.kind == StorageErrorKind::Unavailable,
            _ => false,
        }
    }

    /// Name of the mapping involved, when the error is tied to one.
    pub fn mapping(&self) -> Option<&str> {
        match self {
            Error::Load(e) => Some(&e.mapping),
            Error::Serialization(e) => Some(&e.mapping),
            _ => None,
        }
    }
}

fn fmt_identity(f: &mut fmt::Formatter<'_>, identity: &Attributes) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in identity.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{k}={v}")?;
    }
    write!(f, "}}")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load(e) => write!(f, "Load error: {}", e),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Upsert(e) => write!(f, "Upsert error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Load(e) => Some(e.source.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Serialization(e) => {
                Some(e.source.as_ref() as &(dyn std::error::Error + 'static))
            }
            Error::Upsert(e) => Some(&e.source as &(dyn std::error::Error + 'static)),
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "factory for '{}' failed on row ", self.mapping)?;
        fmt_identity(f, &self.row)?;
        write!(f, ": {}", self.source)
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serializer for '{}' failed: {}", self.mapping, self.source)
    }
}

impl fmt::Display for UpsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            RecordKind::Upsert => "upsert",
            RecordKind::Delete => "delete",
        };
        write!(f, "{} into '{}' ", verb, self.namespace)?;
        fmt_identity(f, &self.identity)?;
        write!(f, " failed: {}", self.source)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(
                f,
                "expected {} for field '{}', found {}",
                self.expected, field, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl std::error::Error for TypeError {}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        Error::Load(err)
    }
}

impl From<SerializationError> for Error {
    fn from(err: SerializationError) -> Self {
        Error::Serialization(err)
    }
}

impl From<UpsertError> for Error {
    fn from(err: UpsertError) -> Self {
        Error::Upsert(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for graphmap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::error::Error as _;

    fn identity() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("id".to_string(), Value::from("p1"));
        attrs
    }

    #[test]
    fn upsert_error_display_and_source() {
        let err = Error::Upsert(UpsertError {
            namespace: "posts".to_string(),
            identity: identity(),
            kind: RecordKind::Upsert,
            source: StorageError::new(StorageErrorKind::Constraint, "duplicate key"),
        });

        assert_eq!(
            err.to_string(),
            "Upsert error: upsert into 'posts' {id=\"p1\"} failed: duplicate key"
        );
        assert_eq!(err.source().unwrap().to_string(), "duplicate key");
        assert!(!err.is_retryable());
    }

    #[test]
    fn load_error_carries_mapping_and_cause() {
        let err = Error::Load(LoadError {
            mapping: "post".to_string(),
            row: identity(),
            source: "missing subject".into(),
        });

        assert_eq!(err.mapping(), Some("post"));
        assert!(err.to_string().contains("missing subject"));
        assert_eq!(err.source().unwrap().to_string(), "missing subject");
    }

    #[test]
    fn retryable_only_for_unavailable_storage() {
        let unavailable = Error::Storage(StorageError::new(
            StorageErrorKind::Unavailable,
            "connection reset",
        ));
        let query = Error::Storage(StorageError::new(StorageErrorKind::Query, "bad column"));

        assert!(unavailable.is_retryable());
        assert!(!query.is_retryable());
    }

    #[test]
    fn mapping_error_helpers() {
        let err = MappingError::unknown_association("user", "friends");
        assert_eq!(err.kind, MappingErrorKind::UnknownAssociation);
        assert_eq!(err.message, "mapping 'user' has no association 'friends'");
    }
}
