//! The repository: the single entry point callers use to reach the store.
//!
//! A [`Repository`] composes the index advisor, the cursor paginator, the atomic mutator and the
//! transaction scope. Every store call it makes runs under the configured operation deadline, and
//! every failure is reported as a [`RepositoryError`].
//!
//! # Example
//!
//! ```ignore
//! use docguard::prelude::*;
//!
//! let mut indexes = IndexAdvisor::new();
//! indexes.register_index(IndexDefinition::builder("accounts").asc("owner").build())?;
//!
//! let repository = Repository::builder(InMemoryStore::new())
//!     .indexes(indexes)
//!     .config(RepositoryConfig::default())
//!     .build()?;
//!
//! repository.ensure_indexes().await?;
//!
//! let spec = QuerySpec::builder().eq("owner", "ana").limit(20).build();
//! let page = repository.find::<Account>(&spec, None).await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Uuid};

use crate::{
    atomic::{AtomicMutator, AtomicOperation, MutationOutcome},
    backend::StoreBackend,
    config::RepositoryConfig,
    cursor::{Cursor, CursorPaginator},
    deadline::Deadline,
    document::{Document, DocumentExt, StoredDocument},
    error::{RepositoryError, RepositoryResult},
    index::IndexAdvisor,
    page::Page,
    query::QuerySpec,
    transaction::{TransactionContext, TransactionOutcome, TransactionScope},
    value::ID_FIELD,
};

/// Guarded access to a document store.
#[derive(Debug)]
pub struct Repository<B: StoreBackend> {
    backend: B,
    indexes: Arc<IndexAdvisor>,
    paginator: CursorPaginator,
    mutator: AtomicMutator,
    config: RepositoryConfig,
}

impl<B: StoreBackend> Repository<B> {
    /// Starts building a repository over `backend`.
    pub fn builder(backend: B) -> RepositoryBuilder<B> {
        RepositoryBuilder::new(backend)
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The registered indexes.
    pub fn indexes(&self) -> &IndexAdvisor {
        &self.indexes
    }

    /// The active configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.operation_timeout())
    }

    /// Parses a textual identifier.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Cast`] if `id` is not a UUID.
    pub fn parse_id(id: &str) -> RepositoryResult<Uuid> {
        Uuid::parse_str(id).map_err(|e| RepositoryError::Cast(format!("invalid identifier {id:?}: {e}")))
    }

    /// Stores a new typed document and returns its identifier.
    pub async fn create<D: Document>(&self, document: &D) -> RepositoryResult<Uuid> {
        let id = *document.id();
        let body = document.to_bson()?;

        if !matches!(&body, Bson::Document(body) if !body.contains_key(ID_FIELD)) {
            return Err(RepositoryError::Validation(format!(
                "{} must serialize to an object without an _id field",
                D::collection_name()
            )));
        }

        self.insert(D::collection_name(), id, body).await
    }

    /// Stores a new untyped document under a freshly assigned identifier.
    pub async fn create_raw(&self, collection: &str, body: bson::Document) -> RepositoryResult<Uuid> {
        if body.contains_key(ID_FIELD) {
            return Err(RepositoryError::Validation(
                "identifiers are assigned by the repository".into(),
            ));
        }

        self.insert(collection, Uuid::new(), Bson::Document(body)).await
    }

    async fn insert(&self, collection: &str, id: Uuid, body: Bson) -> RepositoryResult<Uuid> {
        self.deadline()
            .run("insert", self.backend.insert_documents(vec![(id, body)], collection))
            .await?;

        log::debug!("created {collection}/{id}");
        Ok(id)
    }

    /// Fetches a typed document.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Cast`] if the stored document does not decode into `D`.
    pub async fn get<D: Document>(&self, id: &Uuid) -> RepositoryResult<Option<D>> {
        self.get_raw(D::collection_name(), id)
            .await?
            .map(decode::<D>)
            .transpose()
    }

    /// Fetches an untyped document.
    pub async fn get_raw(&self, collection: &str, id: &Uuid) -> RepositoryResult<Option<StoredDocument>> {
        let rows = self
            .deadline()
            .run("get", self.backend.get_documents(vec![*id], collection))
            .await?;

        rows.into_iter()
            .find(|(found, _)| found == id)
            .map(|(id, body)| StoredDocument::from_row(id, body))
            .transpose()
    }

    /// Fetches one page of typed documents matching `spec`.
    ///
    /// The page size is `spec.limit`, or the configured default. Pass the previous page's
    /// `next_cursor` to continue.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::UnindexedQuery`] if no index covers `spec`; the store is not called.
    /// - [`RepositoryError::InvalidCursor`] if `cursor` is invalid or belongs to another query.
    /// - [`RepositoryError::Cast`] if a stored document does not decode into `D`.
    pub async fn find<D: Document>(
        &self,
        spec: &QuerySpec,
        cursor: Option<&Cursor>,
    ) -> RepositoryResult<Page<D>> {
        self.find_raw(D::collection_name(), spec, cursor)
            .await?
            .try_map(decode::<D>)
    }

    /// Fetches one page of untyped documents matching `spec`.
    pub async fn find_raw(
        &self,
        collection: &str,
        spec: &QuerySpec,
        cursor: Option<&Cursor>,
    ) -> RepositoryResult<Page<StoredDocument>> {
        let matched = self.indexes.validate(collection, spec)?;
        let page_size = spec.limit.unwrap_or(self.config.default_page_size);

        self.paginator
            .paginate(
                &self.backend,
                collection,
                spec,
                &matched,
                cursor,
                page_size,
                self.deadline(),
            )
            .await
    }

    /// Applies one conditional mutation.
    pub async fn mutate(&self, operation: &AtomicOperation) -> RepositoryResult<MutationOutcome> {
        self.mutator
            .apply(&self.backend, operation, self.deadline())
            .await
    }

    /// Deletes a typed document; returns whether it existed.
    pub async fn delete<D: Document>(&self, id: &Uuid) -> RepositoryResult<bool> {
        self.delete_raw(D::collection_name(), id).await
    }

    /// Deletes an untyped document; returns whether it existed.
    pub async fn delete_raw(&self, collection: &str, id: &Uuid) -> RepositoryResult<bool> {
        let removed = self
            .deadline()
            .run("delete", self.backend.delete_documents(vec![*id], collection))
            .await?;

        Ok(removed > 0)
    }

    /// The transaction scope of this repository.
    pub fn transactions(&self) -> TransactionScope<'_, B> {
        TransactionScope::new(&self.backend, self.config.transaction.clone())
            .with_operation_timeout(self.config.operation_timeout())
    }

    /// Begins a transaction. Enlist operations, then pass it to
    /// [`commit_transaction`](Self::commit_transaction).
    pub async fn begin_transaction(&self) -> RepositoryResult<TransactionContext<B::Session>> {
        self.transactions().begin().await
    }

    /// Commits a transaction begun with [`begin_transaction`](Self::begin_transaction).
    pub async fn commit_transaction(
        &self,
        context: &mut TransactionContext<B::Session>,
    ) -> RepositoryResult<TransactionOutcome<()>> {
        self.transactions().commit(context).await
    }

    /// Abandons a transaction begun with [`begin_transaction`](Self::begin_transaction).
    pub async fn abort_transaction(&self, context: &mut TransactionContext<B::Session>) -> RepositoryResult<()> {
        self.transactions().abort(context).await
    }

    /// Runs `body` inside a transaction. See [`TransactionScope::with_transaction`].
    pub async fn with_transaction<T, F>(&self, body: F) -> RepositoryResult<TransactionOutcome<T>>
    where
        T: Send,
        F: FnOnce(&mut TransactionContext<B::Session>) -> RepositoryResult<T> + Send,
    {
        self.transactions().with_transaction(body).await
    }

    /// Creates every registered index in the store.
    pub async fn ensure_indexes(&self) -> RepositoryResult<()> {
        for index in self.indexes.all() {
            self.deadline()
                .run("index creation", self.backend.add_index(index))
                .await?;
        }

        log::info!("ensured {} index(es)", self.indexes.all().len());
        Ok(())
    }

    /// Drops a collection and all its documents.
    pub async fn drop_collection(&self, name: &str) -> RepositoryResult<()> {
        self.deadline()
            .run("drop collection", self.backend.drop_collection(name))
            .await
    }

    /// Lists the collections in the store.
    pub async fn list_collections(&self) -> RepositoryResult<Vec<String>> {
        self.deadline()
            .run("list collections", self.backend.list_collections())
            .await
    }

    /// Shuts the backend down.
    pub async fn shutdown(self) -> RepositoryResult<()> {
        let deadline = self.deadline();
        deadline.run("shutdown", self.backend.shutdown()).await
    }
}

fn decode<D: Document>(document: StoredDocument) -> RepositoryResult<D> {
    D::from_bson(Bson::Document(document.body)).map_err(|e| {
        RepositoryError::Cast(format!(
            "document {} does not decode as {}: {e}",
            document.id,
            D::collection_name()
        ))
    })
}

/// Builder for [`Repository`].
#[derive(Debug)]
pub struct RepositoryBuilder<B: StoreBackend> {
    backend: B,
    indexes: Arc<IndexAdvisor>,
    config: RepositoryConfig,
}

impl<B: StoreBackend> RepositoryBuilder<B> {
    fn new(backend: B) -> Self {
        Self {
            backend,
            indexes: Arc::new(IndexAdvisor::new()),
            config: RepositoryConfig::default(),
        }
    }

    /// Uses `indexes`, frozen from here on.
    pub fn indexes(mut self, indexes: IndexAdvisor) -> Self {
        self.indexes = Arc::new(indexes);
        self
    }

    /// Shares an already frozen index registry.
    pub fn shared_indexes(mut self, indexes: Arc<IndexAdvisor>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and builds the repository.
    pub fn build(self) -> RepositoryResult<Repository<B>> {
        self.config.validate()?;

        let mut paginator = CursorPaginator::new(self.config.max_page_size);
        if let Some(secret) = &self.config.cursor_secret {
            paginator = paginator.with_secret(secret);
        }

        Ok(Repository {
            backend: self.backend,
            indexes: self.indexes,
            paginator,
            mutator: AtomicMutator::new(),
            config: self.config,
        })
    }
}
