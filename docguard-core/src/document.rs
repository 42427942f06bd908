//! Core traits for document representation and serialization.

use bson::{Bson, Uuid, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};

use crate::error::{DocumentStoreResult, RepositoryError, RepositoryResult};

/// Core trait that all typed documents must implement.
///
/// Every document carries a unique identifier that is assigned once, when the value is first
/// created, and never changes afterwards. Use [`Uuid::new`] to mint it.
///
/// # Example
///
/// ```ignore
/// use docguard::document::Document;
/// use bson::Uuid;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Account {
///     pub id: Uuid,
///     pub owner: String,
///     pub balance: i64,
/// }
///
/// impl Document for Account {
///     fn id(&self) -> &Uuid {
///         &self.id
///     }
///
///     fn collection_name() -> &'static str {
///         "accounts"
///     }
/// }
/// ```
pub trait Document: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns a reference to this document's unique identifier.
    fn id(&self) -> &Uuid;

    /// Returns the name of the collection this document belongs to.
    fn collection_name() -> &'static str;
}

/// Extension trait providing BSON conversion for documents.
///
/// Automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Document {
    /// Converts this document to a BSON value for storage.
    fn to_bson(&self) -> DocumentStoreResult<Bson>;

    /// Creates a document from a BSON value.
    fn from_bson(bson: Bson) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_bson(&self) -> DocumentStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }

    fn from_bson(bson: Bson) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(bson)?)
    }
}

/// An untyped document as returned by the store, together with its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// The document's identifier.
    pub id: Uuid,
    /// The stored payload.
    pub body: bson::Document,
}

impl StoredDocument {
    /// Wraps a row read from the store.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Cast`] if the stored value is not an object.
    pub fn from_row(id: Uuid, body: Bson) -> RepositoryResult<Self> {
        match body {
            Bson::Document(body) => Ok(Self { id, body }),
            other => Err(RepositoryError::Cast(format!("document {id} is not an object: {other}"))),
        }
    }
}
