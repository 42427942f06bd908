//! Runs against a live replica set (transactions need one) with test commands enabled:
//!
//! ```text
//! DOCGUARD_MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0 cargo test -p docguard-mongodb -- --ignored
//! ```

use bson::{Bson, Uuid, doc};
use docguard_core::{
    atomic::AtomicOperation,
    backend::StoreBackend,
    error::DocumentStoreError,
    index::IndexDefinition,
    query::Filter,
};
use docguard_mongodb::MongoDbStore;
use mongodb::Client;

struct Fixture {
    client: Client,
    database: String,
    store: MongoDbStore,
}

impl Fixture {
    async fn new() -> Self {
        let uri = std::env::var("DOCGUARD_MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
        let client = Client::with_uri_str(&uri).await.unwrap();
        let database = format!("docguard_{}", Uuid::new().to_string().replace('-', ""));

        Self {
            store: MongoDbStore::new(client.clone(), database.clone()),
            client,
            database,
        }
    }

    async fn account(&self, balance: i64) -> Uuid {
        let id = Uuid::new();
        self.store
            .insert_documents(vec![(id, Bson::Document(doc! { "balance": balance }))], "accounts")
            .await
            .unwrap();
        id
    }

    async fn balance(&self, id: Uuid) -> i64 {
        let rows = self.store.get_documents(vec![id], "accounts").await.unwrap();
        rows[0].1.as_document().unwrap().get_i64("balance").unwrap()
    }

    async fn cleanup(self) {
        self.client.database(&self.database).drop().await.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn guarded_update_matches_only_while_the_guard_holds() {
    let fixture = Fixture::new().await;
    let id = fixture.account(50).await;
    let take = AtomicOperation::guarded_adjust("accounts", id, "balance", -30_i64, Filter::gte("balance", 30_i64));

    let applied = fixture.store.apply_update(&take).await.unwrap();
    assert!(applied.matched);
    assert_eq!(applied.new_value, Some(Bson::Int64(20)));

    let rejected = fixture.store.apply_update(&take).await.unwrap();
    assert!(!rejected.matched);
    assert_eq!(fixture.balance(id).await, 20);

    let missing = AtomicOperation::increment("accounts", Uuid::new(), "balance", 1_i64);
    assert!(!fixture.store.apply_update(&missing).await.unwrap().matched);

    fixture.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn capped_push_keeps_the_latest_entries() {
    let fixture = Fixture::new().await;
    let id = fixture.account(0).await;

    for event in 0..6 {
        fixture
            .store
            .apply_update(&AtomicOperation::capped_push("accounts", id, "recent", [Bson::Int32(event)], 3))
            .await
            .unwrap();
    }

    let rows = fixture.store.get_documents(vec![id], "accounts").await.unwrap();
    let recent = rows[0].1.as_document().unwrap().get_array("recent").unwrap().clone();
    assert_eq!(recent, vec![Bson::Int32(3), Bson::Int32(4), Bson::Int32(5)]);

    fixture.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn unique_index_violation_is_a_duplicate_key() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .add_index(&IndexDefinition::builder("users").asc("email").unique().build())
        .await
        .unwrap();

    let user = || vec![(Uuid::new(), Bson::Document(doc! { "email": "a@x" }))];
    fixture.store.insert_documents(user(), "users").await.unwrap();
    let err = fixture.store.insert_documents(user(), "users").await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::DuplicateKey { .. }));

    fixture.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn concurrent_transactions_on_one_document_conflict() {
    let fixture = Fixture::new().await;
    let id = fixture.account(10).await;
    let op = AtomicOperation::increment("accounts", id, "balance", 1_i64);
    let store = &fixture.store;

    let mut first = store.start_session().await.unwrap();
    let mut second = store.start_session().await.unwrap();
    store.start_transaction(&mut first).await.unwrap();
    store.start_transaction(&mut second).await.unwrap();

    store.apply_in_transaction(&mut first, &op).await.unwrap();
    let err = store.apply_in_transaction(&mut second, &op).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::WriteConflict(_)));

    store.abort_transaction(&mut second).await.unwrap();
    store.commit_transaction(&mut first).await.unwrap();
    assert_eq!(fixture.balance(id).await, 11);

    drop((first, second));
    fixture.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn commit_with_an_unknown_result_is_retried() {
    let fixture = Fixture::new().await;
    let id = fixture.account(10).await;
    let store = &fixture.store;

    let mut session = store.start_session().await.unwrap();
    store.start_transaction(&mut session).await.unwrap();
    store
        .apply_in_transaction(&mut session, &AtomicOperation::increment("accounts", id, "balance", 5_i64))
        .await
        .unwrap();

    // ShutdownInProgress on commit carries the unknown-commit-result label. The driver retries
    // once on its own, so failing twice forces one retry in the store.
    fixture
        .client
        .database("admin")
        .run_command(doc! {
            "configureFailPoint": "failCommand",
            "mode": { "times": 2 },
            "data": { "failCommands": ["commitTransaction"], "errorCode": 91 },
        })
        .await
        .unwrap();

    store.commit_transaction(&mut session).await.unwrap();
    assert_eq!(fixture.balance(id).await, 15);

    drop(session);
    fixture.cleanup().await;
}
