//! MongoDB backend implementation for docguard.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Conditional
//! mutations run as a single `findOneAndUpdate` request, declared indexes are created as compound
//! (optionally unique and partial) MongoDB indexes, and transactions run on driver sessions.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docguard = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! Transactions need a replica set or sharded cluster. Transient transaction errors reported by
//! the server surface as write conflicts, so the repository's retry policy applies to them; an
//! unknown commit result retries only the commit.
//!
//! # Example
//!
//! ```ignore
//! use docguard::{backend::StoreBackendBuilder, mongodb::MongoDbStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017/?replicaSet=rs0", "shop")
//!         .build()
//!         .await?;
//!     let repository = Repository::builder(store).build()?;
//!
//!     Ok(())
//! }
//! ```

mod error;
mod query;
mod sanitizer;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
