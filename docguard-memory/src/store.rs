//! In-memory storage implementation.
//!
//! Documents are kept as BSON in per-collection hash maps behind one async-safe read-write lock.
//! Every document carries a version, bumped on each write, which sessions use for optimistic
//! conflict detection.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, Uuid};
use mea::rwlock::RwLock;

use docguard_core::{
    atomic::{AtomicOperation, MutationOutcome},
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexDefinition,
    query::Query,
    value::{Comparable, lookup},
};

use crate::{
    evaluator::{DocumentEvaluator, compare},
    mutation,
    session::{InMemorySession, Staged},
};

#[derive(Debug, Clone)]
struct StoredDoc {
    body: Document,
    version: u64,
}

#[derive(Debug, Default)]
struct CollectionState {
    documents: HashMap<Uuid, StoredDoc>,
    indexes: Vec<IndexDefinition>,
}

impl CollectionState {
    // Fails if `body`, stored under `id`, would collide with another document on a unique index.
    fn check_unique(&self, collection: &str, id: &Uuid, body: &Document) -> DocumentStoreResult<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            if !covered(index, id, body)? {
                continue;
            }

            let key = index_key(index, body);
            for (other_id, other) in &self.documents {
                if other_id == id || !covered(index, other_id, &other.body)? {
                    continue;
                }
                if same_key(&key, &index_key(index, &other.body)) {
                    return Err(DocumentStoreError::DuplicateKey {
                        collection: collection.to_string(),
                        index: index.name(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn covered(index: &IndexDefinition, id: &Uuid, body: &Document) -> DocumentStoreResult<bool> {
    DocumentEvaluator::matches(*id, body, index.partial_filter.as_ref())
}

fn index_key<'a>(index: &IndexDefinition, body: &'a Document) -> Vec<Option<&'a Bson>> {
    index.fields().map(|field| lookup(body, field)).collect()
}

fn same_key(a: &[Option<&Bson>], b: &[Option<&Bson>]) -> bool {
    a.iter()
        .zip(b)
        .all(|(a, b)| Comparable::from(*a) == Comparable::from(*b))
}

fn as_document(id: &Uuid, bson: Bson) -> DocumentStoreResult<Document> {
    match bson {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "document {id} is not an object: {other}"
        ))),
    }
}

type StoreMap = HashMap<String, CollectionState>;

/// Thread-safe in-memory document storage backend.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// shared across async tasks. Clones share the same data.
///
/// # Performance
///
/// Queries scan every document of a collection. Declared indexes are only used to enforce
/// uniqueness.
///
/// # Example
///
/// ```ignore
/// use docguard_memory::InMemoryStore;
/// use docguard::backend::StoreBackend;
/// use bson::{Uuid, Bson, doc};
///
/// let store = InMemoryStore::new();
///
/// let id = Uuid::new();
/// store.insert_documents(vec![(id, Bson::Document(doc! { "name": "Alice" }))], "users").await?;
///
/// let docs = store.get_documents(vec![id], "users").await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
    /// Number of sessions not yet dropped.
    sessions: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Number of sessions currently held.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn require_transaction(session: &InMemorySession) -> DocumentStoreResult<()> {
        match session.in_transaction {
            true => Ok(()),
            false => Err(DocumentStoreError::Session("no transaction is open".into())),
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Session = InMemorySession;

    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();

        for (id, bson) in documents {
            if state.documents.contains_key(&id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
            }

            let body = as_document(&id, bson)?;
            state.check_unique(collection, &id, &body)?;
            state.documents.insert(id, StoredDoc { body, version: 1 });
        }

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<usize> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(0);
        };

        Ok(ids
            .iter()
            .filter(|id| state.documents.remove(*id).is_some())
            .count())
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(vec![]);
        };

        Ok(ids
            .into_iter()
            .filter_map(|id| {
                state
                    .documents
                    .get(&id)
                    .map(|doc| (id, Bson::Document(doc.body.clone())))
            })
            .collect())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matching = Vec::new();
        for (id, doc) in &state.documents {
            if DocumentEvaluator::matches(*id, &doc.body, query.filter.as_ref())? {
                matching.push((id, &doc.body));
            }
        }

        matching.sort_by(|a, b| compare(*a, *b, &query.sort));

        Ok(matching
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(id, body)| (*id, Bson::Document(body.clone())))
            .collect())
    }

    async fn apply_update(&self, operation: &AtomicOperation) -> DocumentStoreResult<MutationOutcome> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(&operation.collection) else {
            return Ok(MutationOutcome::unmatched());
        };
        let Some(current) = state.documents.get(&operation.target) else {
            return Ok(MutationOutcome::unmatched());
        };

        if !DocumentEvaluator::matches(operation.target, &current.body, operation.guard.as_ref())? {
            return Ok(MutationOutcome::unmatched());
        }

        let mut body = current.body.clone();
        let value = mutation::apply(&mut body, &operation.mutation)?;
        state.check_unique(&operation.collection, &operation.target, &body)?;

        if let Some(stored) = state.documents.get_mut(&operation.target) {
            stored.body = body;
            stored.version += 1;
        }

        Ok(MutationOutcome::applied(Some(value)))
    }

    async fn add_index(&self, index: &IndexDefinition) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(index.collection.clone()).or_default();

        if state.indexes.iter().any(|existing| existing.signature() == index.signature()) {
            return Ok(());
        }

        if index.unique {
            let mut scratch = CollectionState {
                documents: HashMap::new(),
                indexes: vec![index.clone()],
            };
            for (id, doc) in &state.documents {
                scratch.check_unique(&index.collection, id, &doc.body)?;
                scratch.documents.insert(*id, doc.clone());
            }
        }

        log::debug!("created index {} on {}", index.name(), index.collection);
        state.indexes.push(index.clone());

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names: Vec<String> = self.store.read().await.keys().cloned().collect();
        names.sort();

        Ok(names)
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        Ok(InMemorySession::new(self.sessions.clone()))
    }

    async fn start_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        if session.in_transaction {
            return Err(DocumentStoreError::Session("a transaction is already open".into()));
        }

        session.reset();
        session.in_transaction = true;

        Ok(())
    }

    async fn apply_in_transaction(
        &self,
        session: &mut Self::Session,
        operation: &AtomicOperation,
    ) -> DocumentStoreResult<MutationOutcome> {
        Self::require_transaction(session)?;

        let key = (operation.collection.clone(), operation.target);
        let current = match session.staged.get(&key) {
            Some(staged) => staged.clone(),
            None => {
                let store = self.store.read().await;
                let stored = store
                    .get(&operation.collection)
                    .and_then(|state| state.documents.get(&operation.target));

                match stored {
                    Some(stored) => Staged {
                        base_version: stored.version,
                        body: stored.body.clone(),
                    },
                    None => return Ok(MutationOutcome::unmatched()),
                }
            }
        };

        if !DocumentEvaluator::matches(operation.target, &current.body, operation.guard.as_ref())? {
            return Ok(MutationOutcome::unmatched());
        }

        let mut body = current.body;
        let value = mutation::apply(&mut body, &operation.mutation)?;
        session.staged.insert(key, Staged { base_version: current.base_version, body });

        Ok(MutationOutcome::applied(Some(value)))
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        Self::require_transaction(session)?;

        let staged = std::mem::take(&mut session.staged);
        session.reset();

        let mut store = self.store.write().await;

        for ((collection, id), write) in &staged {
            let version = store
                .get(collection)
                .and_then(|state| state.documents.get(id))
                .map(|stored| stored.version);

            if version != Some(write.base_version) {
                log::debug!("write conflict on {collection}/{id}");
                return Err(DocumentStoreError::WriteConflict(format!(
                    "document {id} in {collection} changed during the transaction"
                )));
            }
        }

        // Uniqueness is checked against the collection as it will look after the commit.
        let mut views: HashMap<&str, CollectionState> = HashMap::new();
        for ((collection, id), write) in &staged {
            let Some(state) = store.get(collection) else {
                continue;
            };
            if !state.indexes.iter().any(|index| index.unique) {
                continue;
            }

            let view = views.entry(collection.as_str()).or_insert_with(|| CollectionState {
                documents: state.documents.clone(),
                indexes: state.indexes.clone(),
            });
            if let Some(stored) = view.documents.get_mut(id) {
                stored.body = write.body.clone();
            }
        }

        for ((collection, id), write) in &staged {
            if let Some(view) = views.get(collection.as_str()) {
                view.check_unique(collection, id, &write.body)?;
            }
        }

        for ((collection, id), write) in staged {
            if let Some(stored) = store
                .get_mut(&collection)
                .and_then(|state| state.documents.get_mut(&id))
            {
                stored.body = write.body;
                stored.version += 1;
            }
        }

        Ok(())
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session.reset();
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docguard_memory::InMemoryStore;
/// use docguard::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
