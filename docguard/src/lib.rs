//! Guarded access to a document store.
//!
//! This crate is the primary entry point of docguard. It re-exports the core types from
//! `docguard-core` and the storage backends, so applications depend on a single crate.
//!
//! # Features
//!
//! - **Index-checked queries** - Every query shape is matched against declared indexes before it
//!   reaches the store; unindexed shapes are rejected
//! - **Cursor pagination** - Opaque, tamper-evident continuation tokens with a stable `_id`
//!   tie-breaker
//! - **Atomic mutations** - Set, increment, capped push and guarded adjust, each a single
//!   conditional store request
//! - **Short transactions** - Multi-document changes with bounded retries on write conflicts
//!
//! # Quick Start
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RepositoryError> {
//!     let mut indexes = IndexAdvisor::new();
//!     indexes.register_index(
//!         IndexDefinition::builder("orders")
//!             .asc("status")
//!             .desc("created_at")
//!             .build(),
//!     )?;
//!
//!     let repository = Repository::builder(InMemoryStore::new())
//!         .indexes(indexes)
//!         .build()?;
//!     repository.ensure_indexes().await?;
//!
//!     repository
//!         .create_raw("orders", doc! { "status": "open", "created_at": 1 })
//!         .await?;
//!
//!     let spec = QuerySpec::builder()
//!         .eq("status", "open")
//!         .sort("created_at", SortDirection::Desc)
//!         .limit(20)
//!         .build();
//!
//!     let mut cursor = None;
//!     loop {
//!         let page = repository.find_raw("orders", &spec, cursor.as_ref()).await?;
//!         println!("{} order(s)", page.len());
//!
//!         match page.next_cursor {
//!             Some(next) => cursor = Some(next),
//!             None => break,
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Transactions
//!
//! Operations enlisted in a transaction are applied together or not at all. A guard that does not
//! hold aborts the whole transaction and is reported as an outcome, not an error.
//!
//! ```ignore
//! use docguard::prelude::*;
//!
//! let outcome = repository
//!     .with_transaction(|tx| {
//!         tx.enlist(AtomicOperation::guarded_adjust("accounts", from, "balance", -30, Filter::gte("balance", 30)))?;
//!         tx.enlist(AtomicOperation::increment("accounts", to, "balance", 30))?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! if let TransactionOutcome::GuardRejected { .. } = outcome {
//!     println!("insufficient funds");
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docguard_core::{
    atomic, backend, config, cursor, deadline, document, error, index, page, query, repository,
    transaction, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docguard_memory::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docguard_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
