//! Error types and result types for document store access.
//!
//! Two layers of errors exist:
//!
//! - [`DocumentStoreError`] is what storage backends report. It mirrors the failure modes of the
//!   underlying engine (duplicate keys, write conflicts, connectivity, ...).
//! - [`RepositoryError`] is the stable taxonomy handed to callers of the
//!   [`Repository`](crate::repository::Repository). Backend errors are mapped into it through the
//!   `From` conversion below, so a raw store error never leaves the repository boundary.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A write would violate a unique index.
    #[error("Duplicate key for index {index} in collection {collection}")]
    DuplicateKey {
        /// Collection holding the index.
        collection: String,
        /// Name of the violated index.
        index: String,
    },
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document violates schema constraints or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A stored value has a type the requested mutation cannot work with.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    /// A concurrent transaction modified data this transaction depends on.
    #[error("Write conflict: {0}")]
    WriteConflict(String),
    /// A session was used in a way its transaction state does not allow.
    #[error("Session error: {0}")]
    Session(String),
    /// The store could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The store gave up waiting on an operation.
    #[error("Store timeout: {0}")]
    Timeout(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for backend operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// The error taxonomy exposed by the repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The query is not covered by any declared index. Raised before any store call.
    #[error("Query on collection {collection} is not covered by any index: {reason}")]
    UnindexedQuery {
        /// Collection the query targeted.
        collection: String,
        /// Which part of the query could not be served.
        reason: String,
    },
    /// A pagination token was malformed, truncated, tampered with or issued for another query.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    /// The store rejected a write because of a uniqueness violation.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// A value has the wrong shape or type.
    #[error("Validation error: {0}")]
    Validation(String),
    /// An identifier or stored value could not be coerced to the requested type.
    #[error("Cast error: {0}")]
    Cast(String),
    /// A transaction kept hitting write conflicts until its retry budget ran out.
    #[error("Transaction conflict after {attempts} attempt(s): {reason}")]
    Conflict {
        /// Number of attempts made.
        attempts: u32,
        /// Last conflict reported by the store.
        reason: String,
    },
    /// A deadline expired before the store answered.
    #[error("Deadline exceeded: {0}")]
    Timeout(String),
    /// Connectivity failure. Safe to retry for idempotent operations.
    #[error("Transient store error: {0}")]
    TransientStore(String),
    /// Misconfiguration or resource exhaustion. Never retried.
    #[error("Fatal error: {0}")]
    Fatal(String),
    /// An index with the same field-order signature was already registered.
    #[error("Index already registered: {0}")]
    DuplicateIndex(String),
    /// A transaction was used in a state that does not allow the requested action.
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),
}

/// A specialized `Result` type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    /// Whether a caller may retry the failed call (provided the operation is idempotent).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Timeout(_) | RepositoryError::TransientStore(_))
    }

    /// Whether the error is a transactional write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

impl From<DocumentStoreError> for RepositoryError {
    fn from(err: DocumentStoreError) -> Self {
        match err {
            DocumentStoreError::DocumentAlreadyExists(id, collection) => RepositoryError::DuplicateKey(
                format!("document {id} already exists in collection {collection}"),
            ),
            DocumentStoreError::DuplicateKey { collection, index } => RepositoryError::DuplicateKey(
                format!("index {index} in collection {collection}"),
            ),
            DocumentStoreError::Serialization(msg) | DocumentStoreError::InvalidDocument(msg) => {
                RepositoryError::Validation(msg)
            }
            DocumentStoreError::CollectionNotFound(name) => {
                RepositoryError::Validation(format!("collection not found: {name}"))
            }
            DocumentStoreError::TypeMismatch(msg) => RepositoryError::Cast(msg),
            DocumentStoreError::WriteConflict(reason) => RepositoryError::Conflict { attempts: 1, reason },
            DocumentStoreError::Connection(msg) => RepositoryError::TransientStore(msg),
            DocumentStoreError::Timeout(msg) => RepositoryError::Timeout(msg),
            DocumentStoreError::Session(msg) => RepositoryError::InvalidState(msg),
            DocumentStoreError::Initialization(msg)
            | DocumentStoreError::Backend(msg)
            | DocumentStoreError::Unknown(msg) => {
                log::error!("unrecoverable store error: {msg}");
                RepositoryError::Fatal(msg)
            }
        }
    }
}

impl From<BsonError> for RepositoryError {
    fn from(err: BsonError) -> Self {
        RepositoryError::Validation(err.to_string())
    }
}
