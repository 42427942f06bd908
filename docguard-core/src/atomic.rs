//! Single-request conditional mutations.
//!
//! An [`AtomicOperation`] names one document, one mutation and an optional guard predicate. The
//! store evaluates the guard and applies the mutation in the same request, so there is never a
//! read-modify-write gap. A guard that does not hold is a normal outcome
//! (`matched = false`), not an error.
//!
//! ```ignore
//! use docguard::atomic::AtomicOperation;
//! use docguard::query::Filter;
//!
//! // Take 5 units from stock, but never below zero.
//! let op = AtomicOperation::guarded_adjust("items", id, "stock", -5, Filter::gte("stock", 5));
//! let outcome = repository.mutate(&op).await?;
//! ```

use bson::{Bson, Uuid};

use crate::{
    backend::StoreBackend,
    deadline::Deadline,
    error::{RepositoryError, RepositoryResult},
    query::{Expr, is_id_field},
    value::is_number,
};

/// The change an [`AtomicOperation`] makes.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Overwrites a field.
    Set { field: String, value: Bson },
    /// Adds a numeric delta to a field; a missing field counts as zero.
    Increment { field: String, delta: Bson },
    /// Appends values to an array, keeping only the last `cap` entries.
    CappedPush { field: String, values: Vec<Bson>, cap: usize },
    /// Adds a numeric delta only while the guard holds.
    GuardedAdjust { field: String, delta: Bson },
}

/// Kind of mutation, for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Set,
    Increment,
    CappedPush,
    GuardedAdjust,
}

impl Mutation {
    /// The mutated field.
    pub fn field(&self) -> &str {
        match self {
            Mutation::Set { field, .. }
            | Mutation::Increment { field, .. }
            | Mutation::CappedPush { field, .. }
            | Mutation::GuardedAdjust { field, .. } => field,
        }
    }

    /// The kind of mutation.
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Set { .. } => MutationKind::Set,
            Mutation::Increment { .. } => MutationKind::Increment,
            Mutation::CappedPush { .. } => MutationKind::CappedPush,
            Mutation::GuardedAdjust { .. } => MutationKind::GuardedAdjust,
        }
    }
}

/// One conditional mutation of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicOperation {
    /// Collection holding the target.
    pub collection: String,
    /// Identifier of the target document.
    pub target: Uuid,
    /// The change to make.
    pub mutation: Mutation,
    /// Predicate the stored document must satisfy for the change to apply.
    pub guard: Option<Expr>,
}

impl AtomicOperation {
    fn new(collection: impl Into<String>, target: Uuid, mutation: Mutation) -> Self {
        Self {
            collection: collection.into(),
            target,
            mutation,
            guard: None,
        }
    }

    /// Overwrites `field` with `value`.
    pub fn set(
        collection: impl Into<String>,
        target: Uuid,
        field: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Self {
        Self::new(collection, target, Mutation::Set { field: field.into(), value: value.into() })
    }

    /// Adds `delta` to `field`.
    pub fn increment(
        collection: impl Into<String>,
        target: Uuid,
        field: impl Into<String>,
        delta: impl Into<Bson>,
    ) -> Self {
        Self::new(collection, target, Mutation::Increment { field: field.into(), delta: delta.into() })
    }

    /// Appends `values` to the array `field`, then keeps only its last `cap` entries.
    pub fn capped_push(
        collection: impl Into<String>,
        target: Uuid,
        field: impl Into<String>,
        values: impl IntoIterator<Item = Bson>,
        cap: usize,
    ) -> Self {
        Self::new(
            collection,
            target,
            Mutation::CappedPush {
                field: field.into(),
                values: values.into_iter().collect(),
                cap,
            },
        )
    }

    /// Adds `delta` to `field` only if `guard` holds against the stored document.
    pub fn guarded_adjust(
        collection: impl Into<String>,
        target: Uuid,
        field: impl Into<String>,
        delta: impl Into<Bson>,
        guard: Expr,
    ) -> Self {
        Self::new(
            collection,
            target,
            Mutation::GuardedAdjust { field: field.into(), delta: delta.into() },
        )
        .with_guard(guard)
    }

    /// Attaches a guard predicate. Guards on the same operation are combined with AND.
    pub fn with_guard(mut self, guard: Expr) -> Self {
        self.guard = Some(match self.guard.take() {
            Some(existing) => existing.and(guard),
            None => guard,
        });
        self
    }

    /// The kind of mutation.
    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }

    /// The mutated field.
    pub fn field(&self) -> &str {
        self.mutation.field()
    }

    /// Checks the operation without contacting the store.
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.collection.is_empty() {
            return Err(RepositoryError::Validation("operation has no collection".into()));
        }

        let field = self.field();
        if field.is_empty() || field.starts_with('$') || field.split('.').any(str::is_empty) {
            return Err(RepositoryError::Validation(format!("invalid target field {field:?}")));
        }
        if is_id_field(field) {
            return Err(RepositoryError::Validation("the _id field is immutable".into()));
        }

        match &self.mutation {
            Mutation::Set { .. } => {}
            Mutation::Increment { delta, .. } | Mutation::GuardedAdjust { delta, .. } => {
                if !is_number(delta) {
                    return Err(RepositoryError::Validation(format!(
                        "delta for {field} is not numeric: {delta}"
                    )));
                }
            }
            Mutation::CappedPush { values, cap, .. } => {
                if *cap == 0 {
                    return Err(RepositoryError::Validation(format!(
                        "cap for {field} must be at least 1"
                    )));
                }
                if values.is_empty() {
                    return Err(RepositoryError::Validation(format!(
                        "nothing to push onto {field}"
                    )));
                }
            }
        }

        if self.kind() == MutationKind::GuardedAdjust && self.guard.is_none() {
            return Err(RepositoryError::Validation(format!(
                "guarded adjustment of {field} has no guard"
            )));
        }

        Ok(())
    }
}

/// Result of applying an [`AtomicOperation`].
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// Whether the target existed and its guard held.
    pub matched: bool,
    /// The field's value after the mutation, when it was applied.
    pub new_value: Option<Bson>,
}

impl MutationOutcome {
    /// An applied mutation.
    pub fn applied(new_value: Option<Bson>) -> Self {
        Self { matched: true, new_value }
    }

    /// A mutation that did not apply: target missing or guard failed.
    pub fn unmatched() -> Self {
        Self { matched: false, new_value: None }
    }
}

/// Executes atomic operations against a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicMutator;

impl AtomicMutator {
    pub fn new() -> Self {
        Self
    }

    /// Validates `operation` locally, then applies it in one store request.
    pub async fn apply<B: StoreBackend>(
        &self,
        backend: &B,
        operation: &AtomicOperation,
        deadline: Deadline,
    ) -> RepositoryResult<MutationOutcome> {
        operation.validate()?;

        let outcome = deadline
            .run("atomic update", backend.apply_update(operation))
            .await?;

        log::debug!(
            "{:?} on {}/{} field {}: matched={}",
            operation.kind(),
            operation.collection,
            operation.target,
            operation.field(),
            outcome.matched
        );

        Ok(outcome)
    }
}
