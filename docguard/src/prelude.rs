//! Convenient re-exports of commonly used types from docguard.
//!
//! ```ignore
//! use docguard::prelude::*;
//! ```

pub use docguard_core::{
    atomic::{AtomicMutator, AtomicOperation, Mutation, MutationKind, MutationOutcome},
    backend::{StoreBackend, StoreBackendBuilder},
    config::{RepositoryConfig, TransactionConfig},
    cursor::{Cursor, CursorPaginator},
    deadline::Deadline,
    document::{Document, DocumentExt, StoredDocument},
    error::{DocumentStoreError, DocumentStoreResult, RepositoryError, RepositoryResult},
    index::{IndexAdvisor, IndexDefinition, IndexMatch, IndexWarning},
    page::Page,
    query::{Expr, FieldOp, Filter, Query, QuerySpec, QueryVisitor, Sort, SortDirection},
    repository::{Repository, RepositoryBuilder},
    transaction::{TransactionContext, TransactionOutcome, TransactionScope, TransactionState},
};
