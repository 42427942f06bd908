use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, Uuid, doc};
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, IndexModel,
    error::UNKNOWN_TRANSACTION_COMMIT_RESULT,
    options::{ClientOptions, FindOptions, IndexOptions, ReturnDocument},
};
use docguard_core::{
    atomic::{AtomicOperation, MutationOutcome},
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexDefinition,
    query::Query,
    value::{ID_FIELD, lookup},
};

use crate::{
    error::classify,
    query::{MongoQueryTranslator, selector, sort_document, update_document},
    sanitizer::ValueSanitizer,
};

const MAX_COMMIT_RETRIES: usize = 3;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(&ValueSanitizer::sanitize_string(collection_name))
    }

    fn prepare_document(&self, id: &Uuid, document: &Bson) -> DocumentStoreResult<Document> {
        let mut prepared = ValueSanitizer::sanitize_value(document)
            .as_document()
            .cloned()
            .ok_or_else(|| DocumentStoreError::InvalidDocument("Expected document".into()))?;
        prepared.insert(ID_FIELD, *id);

        Ok(prepared)
    }

    fn restore_document(&self, mut document: Document) -> DocumentStoreResult<(Uuid, Bson)> {
        let id = match document.remove(ID_FIELD) {
            Some(Bson::Binary(binary)) => binary
                .to_uuid()
                .map_err(|e| DocumentStoreError::Serialization(e.to_string()))?,
            other => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "Expected a UUID identifier, found {other:?}"
                )));
            }
        };

        Ok((id, Bson::Document(ValueSanitizer::restore_document(&document))))
    }

    fn outcome(&self, operation: &AtomicOperation, updated: Option<Document>) -> DocumentStoreResult<MutationOutcome> {
        let Some(updated) = updated else {
            return Ok(MutationOutcome::unmatched());
        };

        let (_, body) = self.restore_document(updated)?;
        let new_value = body
            .as_document()
            .and_then(|body| lookup(body, operation.field()))
            .cloned();

        Ok(MutationOutcome::applied(new_value))
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Session = ClientSession;

    async fn insert_documents(&self, documents: Vec<(Uuid, Bson)>, collection: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .insert_many(
                documents
                    .iter()
                    .map(|(id, doc)| self.prepare_document(id, doc))
                    .collect::<DocumentStoreResult<Vec<Document>>>()?,
            )
            .await
            .map_err(|e| classify(e, collection))?;

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<usize> {
        let result = self.get_collection(collection)
            .delete_many(doc! { ID_FIELD: { "$in": ids } })
            .await
            .map_err(|e| classify(e, collection))?;

        Ok(result.deleted_count as usize)
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        self.get_collection(collection)
            .find(doc! { ID_FIELD: { "$in": ids } })
            .await
            .map_err(|e| classify(e, collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| classify(e, collection))?
            .into_iter()
            .map(|doc| self.restore_document(doc))
            .collect()
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<(Uuid, Bson)>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if !query.sort.is_empty() {
            options.sort = Some(sort_document(&query.sort));
        }

        self.get_collection(collection)
            .find(MongoQueryTranslator::filter(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(|e| classify(e, collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| classify(e, collection))?
            .into_iter()
            .map(|doc| self.restore_document(doc))
            .collect()
    }

    async fn apply_update(&self, operation: &AtomicOperation) -> DocumentStoreResult<MutationOutcome> {
        let updated = self.get_collection(&operation.collection)
            .find_one_and_update(selector(operation)?, update_document(&operation.mutation))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| classify(e, &operation.collection))?;

        self.outcome(operation, updated)
    }

    async fn add_index(&self, index: &IndexDefinition) -> DocumentStoreResult<()> {
        let mut options = IndexOptions::default();
        options.name = Some(index.name());
        options.unique = Some(index.unique);
        if let Some(partial) = &index.partial_filter {
            options.partial_filter_expression = Some(MongoQueryTranslator::filter(Some(partial))?);
        }

        self.get_collection(&index.collection)
            .create_index(
                IndexModel::builder()
                    .keys(
                        index.keys
                            .iter()
                            .map(|key| (key.field.clone(), Bson::Int32(key.direction.as_i32())))
                            .collect::<Document>(),
                    )
                    .options(options)
                    .build(),
            )
            .await
            .map_err(|e| classify(e, &index.collection))?;

        log::debug!("created index {} on {}", index.name(), index.collection);

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| classify(e, name))?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| classify(e, &self.database))?
            .into_iter()
            .map(|name| ValueSanitizer::restore_string(&name))
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        self.client
            .start_session()
            .await
            .map_err(|e| classify(e, &self.database))
    }

    async fn start_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session
            .start_transaction()
            .await
            .map_err(|e| classify(e, &self.database))
    }

    async fn apply_in_transaction(
        &self,
        session: &mut Self::Session,
        operation: &AtomicOperation,
    ) -> DocumentStoreResult<MutationOutcome> {
        let updated = self.get_collection(&operation.collection)
            .find_one_and_update(selector(operation)?, update_document(&operation.mutation))
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(|e| classify(e, &operation.collection))?;

        self.outcome(operation, updated)
    }

    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        let mut retries = 0;

        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && retries < MAX_COMMIT_RETRIES => {
                    retries += 1;
                    log::warn!("commit result unknown, retrying commit ({retries}/{MAX_COMMIT_RETRIES}): {e}");
                }
                Err(e) => return Err(classify(e, &self.database)),
            }
        }
    }

    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()> {
        session
            .abort_transaction()
            .await
            .map_err(|e| classify(e, &self.database))
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
