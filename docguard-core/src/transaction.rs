//! Short multi-document transactions.
//!
//! A [`TransactionContext`] collects [`AtomicOperation`]s; [`TransactionScope::commit`] replays
//! them in order inside one store transaction. Transient write conflicts are retried with
//! jittered exponential backoff until the attempt budget or the transaction deadline runs out.
//! A guard that does not hold aborts the whole transaction: nothing is applied and the outcome
//! names the operation that was rejected.
//!
//! ```text
//! Created -> Active -> Committing -> Committed
//!              |  ^        |
//!              |  |        v
//!              |  +---- Retrying
//!              v           |
//!           Aborting -> Aborted
//! ```
//!
//! Operations enlisted in a transaction must only touch the store. The closure given to
//! [`TransactionScope::with_transaction`] is synchronous so it cannot await anything else.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use rand::Rng;

use crate::{
    atomic::{AtomicOperation, MutationOutcome},
    backend::StoreBackend,
    config::TransactionConfig,
    deadline::Deadline,
    error::{RepositoryError, RepositoryResult},
};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`TransactionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Active,
    Retrying,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TransactionState {
    /// Whether the transaction has resolved.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// Result of a transaction that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome<T> {
    /// Every operation applied.
    Committed {
        /// What the transaction body returned.
        value: T,
        /// One outcome per enlisted operation, in order.
        results: Vec<MutationOutcome>,
    },
    /// The guard of operation `operation` (zero-based) did not hold; nothing was applied.
    GuardRejected { operation: usize },
}

impl<T> TransactionOutcome<T> {
    /// Whether the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed { .. })
    }

    /// The body's value, if the transaction committed.
    pub fn into_value(self) -> Option<T> {
        match self {
            TransactionOutcome::Committed { value, .. } => Some(value),
            TransactionOutcome::GuardRejected { .. } => None,
        }
    }
}

/// The state of one transaction, owned by the call stack that began it.
///
/// Dropping a context releases its session; a transaction that never committed is discarded.
#[derive(Debug)]
pub struct TransactionContext<S> {
    id: u64,
    session: Option<S>,
    operations: Vec<AtomicOperation>,
    state: TransactionState,
    deadline: Deadline,
    attempts: u32,
}

impl<S> TransactionContext<S> {
    fn new(deadline: Deadline) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            session: None,
            operations: Vec::new(),
            state: TransactionState::Created,
            deadline,
            attempts: 0,
        }
    }

    /// Process-unique identifier, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Time by which the transaction must resolve.
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Commit attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enlisted operations, in order.
    pub fn operations(&self) -> &[AtomicOperation] {
        &self.operations
    }

    /// Whether the context still holds its session.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Validates `operation` and appends it to the transaction.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::InvalidState`] unless the transaction is active.
    /// - [`RepositoryError::Validation`] if the operation is malformed.
    pub fn enlist(&mut self, operation: AtomicOperation) -> RepositoryResult<()> {
        if self.state != TransactionState::Active {
            return Err(RepositoryError::InvalidState(format!(
                "cannot enlist into transaction {} while {:?}",
                self.id, self.state
            )));
        }

        operation.validate()?;
        self.operations.push(operation);

        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.session = None;
    }
}

impl<S> Drop for TransactionContext<S> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            log::warn!(
                "transaction {} dropped while {:?}; discarding {} operation(s)",
                self.id,
                self.state,
                self.operations.len()
            );
        }
    }
}

enum Attempt {
    Committed(Vec<MutationOutcome>),
    GuardRejected(usize),
}

/// Begins, commits and aborts transactions on a backend.
#[derive(Debug)]
pub struct TransactionScope<'b, B: StoreBackend> {
    backend: &'b B,
    config: TransactionConfig,
    operation_timeout: Duration,
}

impl<'b, B: StoreBackend> TransactionScope<'b, B> {
    pub fn new(backend: &'b B, config: TransactionConfig) -> Self {
        Self {
            backend,
            config,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Budget for the cleanup calls made after a failed attempt.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Acquires a session and returns an active context.
    pub async fn begin(&self) -> RepositoryResult<TransactionContext<B::Session>> {
        let mut context = TransactionContext::new(Deadline::after(self.config.timeout()));

        let session = context
            .deadline
            .run("session start", self.backend.start_session())
            .await?;

        context.session = Some(session);
        context.state = TransactionState::Active;
        log::debug!("transaction {} started", context.id);

        Ok(context)
    }

    /// Appends an operation to an active context.
    pub fn enlist(
        &self,
        context: &mut TransactionContext<B::Session>,
        operation: AtomicOperation,
    ) -> RepositoryResult<()> {
        context.enlist(operation)
    }

    /// Runs the enlisted operations inside one store transaction.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Conflict`] once the attempt budget is spent on write conflicts.
    /// - [`RepositoryError::Timeout`] if the transaction deadline expires.
    /// - [`RepositoryError::InvalidState`] unless the context is active.
    /// - Any other store failure, unretried.
    pub async fn commit(
        &self,
        context: &mut TransactionContext<B::Session>,
    ) -> RepositoryResult<TransactionOutcome<()>> {
        if context.state != TransactionState::Active {
            return Err(RepositoryError::InvalidState(format!(
                "cannot commit transaction {} while {:?}",
                context.id, context.state
            )));
        }
        let Some(mut session) = context.session.take() else {
            return Err(RepositoryError::InvalidState(format!(
                "transaction {} has no session",
                context.id
            )));
        };

        loop {
            context.attempts += 1;
            context.state = TransactionState::Committing;

            let result = self
                .attempt(&mut session, &context.operations, context.deadline)
                .await;

            match result {
                Ok(Attempt::Committed(results)) => {
                    context.finish(TransactionState::Committed);
                    log::info!(
                        "transaction {} committed {} operation(s) after {} attempt(s)",
                        context.id,
                        results.len(),
                        context.attempts
                    );
                    return Ok(TransactionOutcome::Committed { value: (), results });
                }
                Ok(Attempt::GuardRejected(operation)) => {
                    self.rollback(&mut session, context).await;
                    log::info!(
                        "transaction {} aborted: guard of operation {operation} did not hold",
                        context.id
                    );
                    return Ok(TransactionOutcome::GuardRejected { operation });
                }
                Err(RepositoryError::Conflict { reason, .. }) => {
                    self.rollback(&mut session, context).await;

                    if context.attempts >= self.config.max_attempts {
                        log::warn!(
                            "transaction {} gave up after {} conflicting attempt(s)",
                            context.id,
                            context.attempts
                        );
                        return Err(RepositoryError::Conflict { attempts: context.attempts, reason });
                    }

                    context.state = TransactionState::Retrying;
                    let pause = self.backoff(context.attempts);
                    if pause >= context.deadline.remaining() {
                        context.finish(TransactionState::Aborted);
                        return Err(RepositoryError::Timeout(format!(
                            "transaction {} ran out of time while retrying",
                            context.id
                        )));
                    }

                    log::warn!(
                        "transaction {} conflicted on attempt {} ({reason}); retrying in {:?}",
                        context.id,
                        context.attempts,
                        pause
                    );
                    tokio::time::sleep(pause).await;
                    context.state = TransactionState::Active;
                }
                Err(err) => {
                    self.rollback(&mut session, context).await;
                    log::info!("transaction {} aborted: {err}", context.id);
                    return Err(err);
                }
            }
        }
    }

    /// Abandons an unresolved transaction and releases its session.
    ///
    /// Aborting an already aborted transaction is a no-op.
    pub async fn abort(&self, context: &mut TransactionContext<B::Session>) -> RepositoryResult<()> {
        match context.state {
            TransactionState::Aborted => return Ok(()),
            TransactionState::Committed => {
                return Err(RepositoryError::InvalidState(format!(
                    "transaction {} already committed",
                    context.id
                )));
            }
            _ => {}
        }

        // Operations are only sent to the store at commit, so there is nothing to undo there.
        context.state = TransactionState::Aborting;
        context.finish(TransactionState::Aborted);
        log::info!("transaction {} aborted by caller", context.id);

        Ok(())
    }

    /// Begins a transaction, lets `body` enlist operations, then commits.
    ///
    /// If `body` fails the transaction is aborted and the error returned. The session is
    /// released on every path.
    pub async fn with_transaction<T, F>(&self, body: F) -> RepositoryResult<TransactionOutcome<T>>
    where
        T: Send,
        F: FnOnce(&mut TransactionContext<B::Session>) -> RepositoryResult<T> + Send,
    {
        let mut context = self.begin().await?;

        let value = match body(&mut context) {
            Ok(value) => value,
            Err(err) => {
                self.abort(&mut context).await?;
                return Err(err);
            }
        };

        Ok(match self.commit(&mut context).await? {
            TransactionOutcome::Committed { results, .. } => {
                TransactionOutcome::Committed { value, results }
            }
            TransactionOutcome::GuardRejected { operation } => {
                TransactionOutcome::GuardRejected { operation }
            }
        })
    }

    async fn attempt(
        &self,
        session: &mut B::Session,
        operations: &[AtomicOperation],
        deadline: Deadline,
    ) -> RepositoryResult<Attempt> {
        deadline
            .run("transaction start", self.backend.start_transaction(session))
            .await?;

        let mut results = Vec::with_capacity(operations.len());
        for (position, operation) in operations.iter().enumerate() {
            let outcome = deadline
                .run(
                    "transactional update",
                    self.backend.apply_in_transaction(session, operation),
                )
                .await?;

            if !outcome.matched {
                return Ok(Attempt::GuardRejected(position));
            }
            results.push(outcome);
        }

        deadline
            .run("transaction commit", self.backend.commit_transaction(session))
            .await?;

        Ok(Attempt::Committed(results))
    }

    // Discards the store transaction of a failed attempt. The session itself stays usable for
    // the next attempt; the context is marked aborted until a retry reactivates it.
    async fn rollback(&self, session: &mut B::Session, context: &mut TransactionContext<B::Session>) {
        context.state = TransactionState::Aborting;

        let deadline = Deadline::after(self.operation_timeout);
        if let Err(err) = deadline
            .run("transaction abort", self.backend.abort_transaction(session))
            .await
        {
            log::warn!("transaction {} abort failed: {err}", context.id);
        }

        context.state = TransactionState::Aborted;
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.config.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(ceiling / 2..=ceiling))
    }
}
