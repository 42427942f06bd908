//! Classification of driver errors into store errors.

use mongodb::error::{Error, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure};

use docguard_core::error::DocumentStoreError;

const DUPLICATE_KEY: i32 = 11000;
const TYPE_MISMATCH: i32 = 14;
const WRITE_CONFLICT: i32 = 112;

fn server_code(kind: &ErrorKind) -> Option<i32> {
    match kind {
        ErrorKind::Write(WriteFailure::WriteError(error)) => Some(error.code),
        ErrorKind::Command(error) => Some(error.code),
        ErrorKind::InsertMany(error) => error
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|error| error.code),
        _ => None,
    }
}

/// Maps a driver error raised while working on `collection`.
pub(crate) fn classify(err: Error, collection: &str) -> DocumentStoreError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return DocumentStoreError::WriteConflict(err.to_string());
    }

    match server_code(&err.kind) {
        Some(DUPLICATE_KEY) => {
            return DocumentStoreError::DuplicateKey {
                collection: collection.to_string(),
                index: err.to_string(),
            };
        }
        Some(WRITE_CONFLICT) => return DocumentStoreError::WriteConflict(err.to_string()),
        Some(TYPE_MISMATCH) => return DocumentStoreError::TypeMismatch(err.to_string()),
        _ => {}
    }

    match *err.kind {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            DocumentStoreError::Connection(err.to_string())
        }
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            DocumentStoreError::Serialization(err.to_string())
        }
        ErrorKind::InvalidArgument { .. } => DocumentStoreError::InvalidDocument(err.to_string()),
        ErrorKind::Transaction { .. } => DocumentStoreError::Session(err.to_string()),
        _ => DocumentStoreError::Backend(err.to_string()),
    }
}
