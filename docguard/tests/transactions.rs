mod common;

use std::time::Duration;

use bson::{Uuid, doc};
use docguard::prelude::*;

use common::{CountingBackend, int};

fn config(max_attempts: u32) -> RepositoryConfig {
    RepositoryConfig::builder()
        .with_max_attempts(max_attempts)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .build()
        .unwrap()
}

async fn accounts(backend: CountingBackend, max_attempts: u32) -> (Repository<CountingBackend>, Uuid, Uuid) {
    let repository = Repository::builder(backend).config(config(max_attempts)).build().unwrap();
    let a = repository
        .create_raw("accounts", doc! { "owner": "a", "balance": 100_i64 })
        .await
        .unwrap();
    let b = repository
        .create_raw("accounts", doc! { "owner": "b", "balance": 50_i64 })
        .await
        .unwrap();

    (repository, a, b)
}

async fn balance(repository: &Repository<CountingBackend>, id: &Uuid) -> i64 {
    int(&repository.get_raw("accounts", id).await.unwrap().unwrap(), "balance")
}

async fn transfer(
    repository: &Repository<CountingBackend>,
    from: Uuid,
    to: Uuid,
    amount: i64,
) -> RepositoryResult<TransactionOutcome<()>> {
    repository
        .with_transaction(move |tx| {
            tx.enlist(AtomicOperation::guarded_adjust(
                "accounts",
                from,
                "balance",
                -amount,
                Filter::gte("balance", amount),
            ))?;
            tx.enlist(AtomicOperation::increment("accounts", to, "balance", amount))?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn transfer_moves_funds_or_nothing() {
    let backend = CountingBackend::new();
    let (repository, a, b) = accounts(backend.clone(), 5).await;

    let outcome = transfer(&repository, a, b, 30).await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!((balance(&repository, &a).await, balance(&repository, &b).await), (70, 80));

    let outcome = transfer(&repository, a, b, 200).await.unwrap();
    assert_eq!(outcome, TransactionOutcome::GuardRejected { operation: 0 });
    assert_eq!((balance(&repository, &a).await, balance(&repository, &b).await), (70, 80));

    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn later_rejection_undoes_earlier_operations() {
    let backend = CountingBackend::new();
    let (repository, a, _) = accounts(backend.clone(), 5).await;

    let outcome = transfer(&repository, a, Uuid::new(), 10).await.unwrap();

    assert_eq!(outcome, TransactionOutcome::GuardRejected { operation: 1 });
    assert_eq!(balance(&repository, &a).await, 100);
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn committed_results_follow_enlistment_order() {
    let (repository, a, b) = accounts(CountingBackend::new(), 5).await;

    let outcome = transfer(&repository, a, b, 25).await.unwrap();

    let TransactionOutcome::Committed { results, .. } = outcome else {
        panic!("transfer was rejected");
    };
    assert_eq!(
        results.iter().map(|result| result.new_value.clone()).collect::<Vec<_>>(),
        vec![Some(75_i64.into()), Some(75_i64.into())]
    );
}

#[tokio::test]
async fn write_conflicts_are_retried() {
    let backend = CountingBackend::conflicting(2);
    let (repository, a, b) = accounts(backend.clone(), 5).await;

    let outcome = transfer(&repository, a, b, 30).await.unwrap();

    assert!(outcome.is_committed());
    assert_eq!(backend.commits(), 3);
    assert_eq!((balance(&repository, &a).await, balance(&repository, &b).await), (70, 80));
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn retries_are_bounded() {
    let backend = CountingBackend::conflicting(usize::MAX);
    let (repository, a, b) = accounts(backend.clone(), 3).await;

    let err = transfer(&repository, a, b, 30).await.unwrap_err();

    assert!(matches!(err, RepositoryError::Conflict { attempts: 3, .. }));
    assert_eq!(backend.commits(), 3);
    assert_eq!((balance(&repository, &a).await, balance(&repository, &b).await), (100, 50));
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn retries_stop_at_the_deadline() {
    let backend = CountingBackend::conflicting(usize::MAX);
    let config = RepositoryConfig::builder()
        .with_max_attempts(50)
        .with_backoff(Duration::from_millis(40), Duration::from_millis(80))
        .with_transaction_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let repository = Repository::builder(backend.clone()).config(config).build().unwrap();
    let a = repository
        .create_raw("accounts", doc! { "balance": 100_i64 })
        .await
        .unwrap();

    let err = repository
        .with_transaction(|tx| tx.enlist(AtomicOperation::increment("accounts", a, "balance", 1_i64)))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Timeout(_)));
    assert!(backend.commits() < 50);
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn failing_body_aborts_and_releases_the_session() {
    let backend = CountingBackend::new();
    let (repository, a, _) = accounts(backend.clone(), 5).await;

    let err = repository
        .with_transaction(|tx| {
            tx.enlist(AtomicOperation::increment("accounts", a, "balance", 1_i64))?;
            tx.enlist(AtomicOperation::increment("accounts", a, "_id", 1_i64))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Validation(_)));
    assert_eq!(backend.commits(), 0);
    assert_eq!(balance(&repository, &a).await, 100);
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn explicit_lifecycle() {
    let backend = CountingBackend::new();
    let (repository, a, b) = accounts(backend.clone(), 5).await;

    let mut tx = repository.begin_transaction().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Active);
    assert_eq!(backend.inner.active_sessions(), 1);

    tx.enlist(AtomicOperation::increment("accounts", a, "balance", -5_i64)).unwrap();
    tx.enlist(AtomicOperation::increment("accounts", b, "balance", 5_i64)).unwrap();

    let outcome = repository.commit_transaction(&mut tx).await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(tx.attempts(), 1);
    assert!(!tx.has_session());

    assert!(matches!(
        tx.enlist(AtomicOperation::increment("accounts", a, "balance", 1_i64)),
        Err(RepositoryError::InvalidState(_))
    ));
    assert!(matches!(
        repository.commit_transaction(&mut tx).await,
        Err(RepositoryError::InvalidState(_))
    ));
    assert!(matches!(
        repository.abort_transaction(&mut tx).await,
        Err(RepositoryError::InvalidState(_))
    ));

    assert_eq!((balance(&repository, &a).await, balance(&repository, &b).await), (95, 55));
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn abort_discards_enlisted_operations() {
    let backend = CountingBackend::new();
    let (repository, a, _) = accounts(backend.clone(), 5).await;

    let mut tx = repository.begin_transaction().await.unwrap();
    tx.enlist(AtomicOperation::increment("accounts", a, "balance", 1_000_i64)).unwrap();

    repository.abort_transaction(&mut tx).await.unwrap();
    repository.abort_transaction(&mut tx).await.unwrap();

    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(backend.commits(), 0);
    assert_eq!(balance(&repository, &a).await, 100);
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn dropping_an_open_transaction_releases_the_session() {
    let backend = CountingBackend::new();
    let (repository, a, _) = accounts(backend.clone(), 5).await;

    {
        let mut tx = repository.begin_transaction().await.unwrap();
        tx.enlist(AtomicOperation::increment("accounts", a, "balance", 1_i64)).unwrap();
    }

    assert_eq!(backend.inner.active_sessions(), 0);
    assert_eq!(balance(&repository, &a).await, 100);
}

async fn users(backend: CountingBackend) -> (Repository<CountingBackend>, Uuid, Uuid) {
    let mut indexes = IndexAdvisor::new();
    indexes
        .register_index(IndexDefinition::builder("users").asc("email").unique().build())
        .unwrap();
    let repository = Repository::builder(backend)
        .indexes(indexes)
        .config(config(5))
        .build()
        .unwrap();
    repository.ensure_indexes().await.unwrap();

    let a = repository.create_raw("users", doc! { "email": "a@x" }).await.unwrap();
    let b = repository.create_raw("users", doc! { "email": "b@x" }).await.unwrap();

    (repository, a, b)
}

async fn email(repository: &Repository<CountingBackend>, id: &Uuid) -> String {
    let stored = repository.get_raw("users", id).await.unwrap().unwrap();
    stored.body.get_str("email").unwrap().to_string()
}

#[tokio::test]
async fn staged_writes_cannot_share_a_unique_key() {
    let backend = CountingBackend::new();
    let (repository, a, b) = users(backend.clone()).await;

    let err = repository
        .with_transaction(move |tx| {
            tx.enlist(AtomicOperation::set("users", a, "email", "same@x"))?;
            tx.enlist(AtomicOperation::set("users", b, "email", "same@x"))?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::DuplicateKey(_)));
    assert_eq!(backend.commits(), 1);
    assert_eq!((email(&repository, &a).await, email(&repository, &b).await), ("a@x".into(), "b@x".into()));
    assert_eq!(backend.inner.active_sessions(), 0);
}

#[tokio::test]
async fn staged_write_cannot_take_a_stored_unique_key() {
    let backend = CountingBackend::new();
    let (repository, a, _) = users(backend.clone()).await;

    let err = repository
        .with_transaction(move |tx| tx.enlist(AtomicOperation::set("users", a, "email", "b@x")))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::DuplicateKey(_)));
    assert_eq!(email(&repository, &a).await, "a@x");
    assert_eq!(backend.inner.active_sessions(), 0);
}
