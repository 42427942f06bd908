//! Query expression evaluation for in-memory document filtering.
//!
//! Fields are addressed by dotted path; `_id` addresses the document identifier. A missing field
//! reads as null, so `eq null` matches it, `ne null` does not, and ordering comparisons against
//! anything but null fail.

use std::cmp::Ordering;

use bson::{Bson, Document, Uuid};

use docguard_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection, is_id_field},
    value::{Comparable, lookup},
};

pub(crate) struct DocumentEvaluator<'a> {
    id: Bson,
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(id: Uuid, document: &'a Document) -> Self {
        Self { id: Bson::from(id), document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Evaluates an optional predicate; no predicate always matches.
    pub fn matches(id: Uuid, document: &Document, expr: Option<&Expr>) -> DocumentStoreResult<bool> {
        match expr {
            Some(expr) => DocumentEvaluator::new(id, document).evaluate(expr),
            None => Ok(true),
        }
    }

    fn value(&self, field: &str) -> Option<&Bson> {
        match is_id_field(field) {
            true => Some(&self.id),
            false => lookup(self.document, field),
        }
    }
}

/// Orders two documents by a multi-key sort, nulls and missing fields first.
pub(crate) fn compare(
    (a_id, a): (&Uuid, &Document),
    (b_id, b): (&Uuid, &Document),
    sort: &[Sort],
) -> Ordering {
    let a = DocumentEvaluator::new(*a_id, a);
    let b = DocumentEvaluator::new(*b_id, b);

    for key in sort {
        let ordering = Comparable::from(a.value(&key.field)).total_cmp(&Comparable::from(b.value(&key.field)));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(self.value(field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let stored = self.value(field);
        let left = Comparable::from(stored);
        let right = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => match left.partial_cmp(&right) {
                Some(ordering) => match op {
                    FieldOp::Gt => ordering == Ordering::Greater,
                    FieldOp::Gte => ordering != Ordering::Less,
                    FieldOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            },
            FieldOp::Contains => contains(&left, &right),
            FieldOp::NotContains => stored.is_none() || !contains(&left, &right),
            FieldOp::StartsWith => match (&left, &right) {
                (Comparable::String(left), Comparable::String(right)) => left.starts_with(right),
                _ => false,
            },
            FieldOp::EndsWith => match (&left, &right) {
                (Comparable::String(left), Comparable::String(right)) => left.ends_with(right),
                _ => false,
            },
            FieldOp::AnyOf => stored.is_some() && any_of(&left, &right),
            FieldOp::NoneOf => stored.is_none() || !any_of(&left, &right),
        })
    }
}

fn contains(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), value) => items.iter().any(|item| item == value),
        (Comparable::String(left), Comparable::String(right)) => left.contains(right),
        _ => false,
    }
}

fn any_of(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), Comparable::Array(values)) => {
            values.iter().any(|value| items.iter().any(|item| item == value))
        }
        (Comparable::Array(items), value) => items.iter().any(|item| item == value),
        (value, Comparable::Array(values)) => values.iter().any(|candidate| candidate == value),
        _ => false,
    }
}
