//! Guarded access to document stores.
//!
//! This crate is the core of the docguard project and provides:
//!
//! - **Document traits** ([`document`]) - Core traits for defining and serializing documents
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query API** ([`query`]) - Query shapes, filter expressions and the expression visitor
//! - **Index advisor** ([`index`]) - Declared indexes and query coverage checks
//! - **Cursor pagination** ([`cursor`], [`page`]) - Opaque tokens and forward-only pages
//! - **Atomic mutations** ([`atomic`]) - Single-request conditional updates
//! - **Transactions** ([`transaction`]) - Short, retried multi-document transactions
//! - **Repository** ([`repository`]) - The entry point composing all of the above
//! - **Configuration** ([`config`]) and **deadlines** ([`deadline`])
//! - **Error handling** ([`error`]) - Backend errors and the repository error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use docguard::document::Document;
//! use bson::Uuid;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: Uuid,
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     fn id(&self) -> &Uuid {
//!         &self.id
//!     }
//!
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//! ```

pub mod atomic;
pub mod backend;
pub mod config;
pub mod cursor;
pub mod deadline;
pub mod document;
pub mod error;
pub mod index;
pub mod page;
pub mod query;
pub mod repository;
pub mod transaction;
pub mod value;
