//! Applies [`Mutation`]s to stored documents.

use bson::{Bson, Document};

use docguard_core::{
    atomic::Mutation,
    error::{DocumentStoreError, DocumentStoreResult},
    value::{add_numbers, assign, is_number, lookup},
};

/// Applies `mutation` to `document` in place and returns the field's new value.
pub(crate) fn apply(document: &mut Document, mutation: &Mutation) -> DocumentStoreResult<Bson> {
    let field = mutation.field();

    let value = match mutation {
        Mutation::Set { value, .. } => value.clone(),
        Mutation::Increment { delta, .. } | Mutation::GuardedAdjust { delta, .. } => {
            let current = lookup(document, field).cloned().unwrap_or(Bson::Int32(0));
            if !is_number(&current) {
                return Err(DocumentStoreError::TypeMismatch(format!(
                    "cannot add to non-numeric field {field}"
                )));
            }

            add_numbers(&current, delta).ok_or_else(|| {
                DocumentStoreError::TypeMismatch(format!("numeric overflow on field {field}"))
            })?
        }
        Mutation::CappedPush { values, cap, .. } => {
            let mut items = match lookup(document, field) {
                None => Vec::new(),
                Some(Bson::Array(items)) => items.clone(),
                Some(other) => {
                    return Err(DocumentStoreError::TypeMismatch(format!(
                        "cannot push onto field {field} holding {other}"
                    )));
                }
            };

            items.extend(values.iter().cloned());
            if items.len() > *cap {
                items.drain(..items.len() - cap);
            }

            Bson::Array(items)
        }
    };

    if !assign(document, field, value.clone()) {
        return Err(DocumentStoreError::TypeMismatch(format!(
            "a parent of field {field} is not a document"
        )));
    }

    Ok(value)
}
