//! Repository configuration.
//!
//! [`RepositoryConfig`] can be deserialized (every field has a default) or assembled with its
//! builder:
//!
//! ```ignore
//! let config = RepositoryConfig::builder()
//!     .with_operation_timeout(Duration::from_secs(2))
//!     .with_cursor_secret("change-me")
//!     .build()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};

/// Settings for the repository and its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Deadline for every single store call, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Page size used when a query sets no limit.
    pub default_page_size: usize,
    /// Largest page size a caller may request.
    pub max_page_size: usize,
    /// Secret used to sign cursors. Unsigned cursors only carry a checksum.
    pub cursor_secret: Option<String>,
    /// Transaction retry policy.
    pub transaction: TransactionConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            default_page_size: 50,
            max_page_size: 1_000,
            cursor_secret: None,
            transaction: TransactionConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::default()
    }

    /// Parses a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> RepositoryResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepositoryError::Fatal(format!("invalid repository configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// The per-call deadline budget.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Rejects settings the repository cannot run with.
    pub fn validate(&self) -> RepositoryResult<()> {
        let fail = |msg: &str| Err(RepositoryError::Fatal(format!("invalid repository configuration: {msg}")));

        if self.operation_timeout_ms == 0 {
            return fail("operation_timeout_ms must be positive");
        }
        if self.max_page_size == 0 {
            return fail("max_page_size must be positive");
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return fail("default_page_size must be within 1..=max_page_size");
        }
        if self.cursor_secret.as_deref() == Some("") {
            return fail("cursor_secret must not be empty");
        }

        self.transaction.validate()
    }
}

/// Retry and time budget for transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Attempts before a conflicting transaction gives up.
    pub max_attempts: u32,
    /// First backoff step, in milliseconds.
    pub base_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub max_backoff_ms: u64,
    /// Total time a transaction may take, retries included, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 500,
            timeout_ms: 10_000,
        }
    }
}

impl TransactionConfig {
    /// The total time budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound of the backoff before attempt `attempt + 1` (`attempt` starts at 1).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }

    fn validate(&self) -> RepositoryResult<()> {
        let fail = |msg: &str| Err(RepositoryError::Fatal(format!("invalid transaction configuration: {msg}")));

        if self.max_attempts == 0 {
            return fail("max_attempts must be at least 1");
        }
        if self.timeout_ms == 0 {
            return fail("timeout_ms must be positive");
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return fail("base_backoff_ms exceeds max_backoff_ms");
        }

        Ok(())
    }
}

/// Builder for [`RepositoryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfigBuilder {
    config: RepositoryConfig,
}

impl RepositoryConfigBuilder {
    /// Sets the per-call deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the page size used when a query sets no limit.
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.config.default_page_size = size;
        self
    }

    /// Sets the largest accepted page size.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.config.max_page_size = size;
        self
    }

    /// Signs cursors with `secret`.
    pub fn with_cursor_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.cursor_secret = Some(secret.into());
        self
    }

    /// Sets the number of transaction attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.transaction.max_attempts = attempts;
        self
    }

    /// Sets the transaction backoff range.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.transaction.base_backoff_ms = base.as_millis() as u64;
        self.config.transaction.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Sets the total transaction time budget.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.config.transaction.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> RepositoryResult<RepositoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
