#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bson::{Bson, Uuid};
use docguard::{
    memory::{InMemorySession, InMemoryStore},
    prelude::*,
};

/// Wraps an [`InMemoryStore`], counting store calls and failing the next `n` commits with a
/// write conflict. A stalled backend never finishes shutting down.
#[derive(Debug, Clone, Default)]
pub struct CountingBackend {
    pub inner: InMemoryStore,
    pub queries: Arc<AtomicUsize>,
    pub commits: Arc<AtomicUsize>,
    conflicts: Arc<AtomicUsize>,
    stalled: bool,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conflicting(commits: usize) -> Self {
        let backend = Self::default();
        backend.conflicts.store(commits, Ordering::SeqCst);
        backend
    }

    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for CountingBackend {
    type Session = InMemorySession;

    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents, collection).await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<usize> {
        self.inner.delete_documents(ids, collection).await
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        self.inner.get_documents(ids, collection).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_documents(query, collection).await
    }

    async fn apply_update(&self, operation: &AtomicOperation) -> DocumentStoreResult<MutationOutcome> {
        self.inner.apply_update(operation).await
    }

    async fn add_index(&self, index: &IndexDefinition) -> DocumentStoreResult<()> {
        self.inner.add_index(index).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        self.inner.start_session().await
    }

    async fn start_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        self.inner.start_transaction(session).await
    }

    async fn apply_in_transaction(
        &self,
        session: &mut Self::Session,
        operation: &AtomicOperation,
    ) -> DocumentStoreResult<MutationOutcome> {
        self.inner.apply_in_transaction(session, operation).await
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);

        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(DocumentStoreError::WriteConflict("injected".into()));
        }

        self.inner.commit_transaction(session).await
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        self.inner.abort_transaction(session).await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        if self.stalled {
            futures::future::pending::<()>().await;
        }

        self.inner.shutdown().await
    }
}

pub fn int(document: &StoredDocument, field: &str) -> i64 {
    match document.body.get(field) {
        Some(Bson::Int32(value)) => i64::from(*value),
        Some(Bson::Int64(value)) => *value,
        other => panic!("{field} is not an integer: {other:?}"),
    }
}
