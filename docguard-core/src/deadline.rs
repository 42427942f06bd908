//! Deadlines for store calls.
//!
//! Every network-bound call made by the repository runs under a [`Deadline`]. When it expires the
//! call is abandoned and [`RepositoryError::Timeout`] is returned; nothing is rolled back outside
//! of a transaction.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, timeout_at};

use crate::error::{DocumentStoreResult, RepositoryError, RepositoryResult};

/// A point in time by which an operation must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    /// A deadline at a fixed instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The instant the deadline expires.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Runs a store call under this deadline, mapping its error into the repository taxonomy.
    pub async fn run<T, F>(&self, what: &str, call: F) -> RepositoryResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        match timeout_at(self.at, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                log::warn!("{what} did not finish before its deadline");
                Err(RepositoryError::Timeout(format!("{what} exceeded its deadline")))
            }
        }
    }
}
