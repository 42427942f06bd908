//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over storage engines, allowing the repository to
//! work with different backends (in-memory, MongoDB, ...).
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for everything the repository
//! asks of a store: identifier-based reads and writes, filtered and sorted queries, single-request
//! conditional updates, index creation, and sessions carrying multi-document transactions.
//! Implementations are required to be thread-safe (`Send + Sync`) and own their synchronization;
//! the repository holds no locks of its own.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docguard::backend::StoreBackend;
//! use bson::{Uuid, Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let uuid = Uuid::new();
//! let doc = Bson::Document(doc! { "name": "Alice", "age": 30 });
//! backend.insert_documents(vec![(uuid, doc)], "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Uuid};
use std::fmt::Debug;

use crate::{
    atomic::{AtomicOperation, MutationOutcome},
    error::DocumentStoreResult,
    index::IndexDefinition,
    query::Query,
};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The concurrency model is implementation-specific.
///
/// # Sessions
///
/// A [`Session`](StoreBackend::Session) carries at most one open transaction. Sessions are
/// RAII handles: dropping one releases it and discards any transaction that was never
/// committed.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult). Backends
/// must report transient transaction conflicts as
/// [`DocumentStoreError::WriteConflict`](crate::error::DocumentStoreError::WriteConflict) so
/// transactions can be retried.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// The session handle transactions run on.
    type Session: Send;

    /// Inserts new documents into a collection.
    ///
    /// The collection is created on first use. Fails with
    /// [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists) when an
    /// identifier is taken and with
    /// [`DuplicateKey`](crate::error::DocumentStoreError::DuplicateKey) when a unique index
    /// would be violated.
    ///
    /// # Arguments
    ///
    /// * `documents` - A vector of (UUID, BSON document) pairs to insert
    /// * `collection` - The name of the collection to insert into
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Deletes documents by identifier and returns how many existed.
    ///
    /// Unknown identifiers are skipped.
    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<usize>;

    /// Retrieves documents by identifier.
    ///
    /// Missing identifiers are omitted from the result; order is not guaranteed.
    async fn get_documents(
        &self,
        ids: Vec<Uuid>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<(Uuid, Bson)>>;

    /// Runs a filtered, sorted and limited query.
    ///
    /// Documents are ordered by every entry of [`Query::sort`] in turn. The field `_id` addresses
    /// the document identifier in both filter and sort.
    ///
    /// # See Also
    ///
    /// - [`Query`] for constructing queries
    /// - [`crate::query::Filter`] for building filter expressions
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<(Uuid, Bson)>>;

    /// Applies one conditional mutation in a single request.
    ///
    /// The guard is evaluated against the stored document and the mutation applied in the same
    /// atomic step. When the document is missing or the guard fails nothing changes and the
    /// outcome reports `matched = false`.
    async fn apply_update(&self, operation: &AtomicOperation) -> DocumentStoreResult<MutationOutcome>;

    /// Creates an index in the store.
    ///
    /// Creating an index that already exists with the same definition is not an error.
    async fn add_index(&self, index: &IndexDefinition) -> DocumentStoreResult<()>;

    /// Drops a collection and all its documents.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Acquires a new session.
    async fn start_session(&self) -> DocumentStoreResult<Self::Session>;

    /// Opens a transaction on `session`.
    async fn start_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Applies a conditional mutation inside the session's open transaction.
    ///
    /// Same contract as [`apply_update`](StoreBackend::apply_update), except that the effect only
    /// becomes visible to others once the transaction commits.
    async fn apply_in_transaction(
        &self,
        session: &mut Self::Session,
        operation: &AtomicOperation,
    ) -> DocumentStoreResult<MutationOutcome>;

    /// Commits the session's open transaction.
    ///
    /// Fails with [`WriteConflict`](crate::error::DocumentStoreError::WriteConflict) when a
    /// concurrent writer invalidated the transaction; nothing is applied in that case.
    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Discards the session's open transaction.
    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections should
    /// override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Factory trait for creating backend instances.
///
/// ```ignore
/// let backend = MongoStoreBuilder::new()
///     .with_uri("mongodb://localhost:27017")
///     .with_database("app")
///     .build()
///     .await?;
/// ```
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
