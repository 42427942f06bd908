//! In-memory document storage backend for docguard.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is intended for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Full query support** - Filtering on dotted paths, multi-key sorting and limits
//! - **Unique indexes** - Including partial unique indexes
//! - **Optimistic transactions** - Staged writes validated against document versions at commit
//!
//! # Quick Start
//!
//! ```ignore
//! use docguard::prelude::*;
//! use docguard::memory::InMemoryStore;
//!
//! let repository = Repository::builder(InMemoryStore::new()).build()?;
//! let id = repository.create_raw("users", bson::doc! { "name": "Alice" }).await?;
//! ```

mod evaluator;
mod mutation;
pub mod session;
pub mod store;

pub use session::InMemorySession;
pub use store::{InMemoryStore, InMemoryStoreBuilder};
