//! Optimistic sessions for the in-memory store.
//!
//! Writes made inside a transaction are staged on the session together with the version of each
//! document they were based on. Commit re-checks those versions under the store's write lock and
//! fails with a write conflict if any document changed in the meantime.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bson::{Document, Uuid};

#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub base_version: u64,
    pub body: Document,
}

/// A session on an [`InMemoryStore`](crate::InMemoryStore).
///
/// Dropping the session discards any uncommitted transaction.
#[derive(Debug)]
pub struct InMemorySession {
    pub(crate) in_transaction: bool,
    pub(crate) staged: HashMap<(String, Uuid), Staged>,
    open: Arc<AtomicUsize>,
}

impl InMemorySession {
    pub(crate) fn new(open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);

        Self {
            in_transaction: false,
            staged: HashMap::new(),
            open,
        }
    }

    /// Whether a transaction is open on this session.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn reset(&mut self) {
        self.in_transaction = false;
        self.staged.clear();
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
