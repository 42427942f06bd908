//! Translation of docguard expressions, sorts and mutations into MongoDB documents.

use bson::{Bson, Document, doc};

use docguard_core::{
    atomic::{AtomicOperation, Mutation},
    error::DocumentStoreError,
    query::{Expr, FieldOp, QueryVisitor, Sort},
};

use crate::sanitizer::ValueSanitizer;

/// Translates query expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    pub(crate) fn filter(expr: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match expr {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let value = ValueSanitizer::sanitize_value(value);

        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(&s) },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(&s) } },
                    other => doc! { "$not": { "$elemMatch": { "$eq": other } } },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(&s)) },
                    _ => return Err(DocumentStoreError::InvalidDocument("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(&s)) },
                    _ => return Err(DocumentStoreError::InvalidDocument("EndsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(values) => doc! { "$in": values },
                    other => doc! { "$in": [other] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(values) => doc! { "$nin": values },
                    other => doc! { "$nin": [other] },
                },
            }
        })
    }
}

fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// The sort document for a multi-key ordering.
pub(crate) fn sort_document(sort: &[Sort]) -> Document {
    sort.iter()
        .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
        .collect()
}

/// Selects the target document, restricted by the guard when there is one.
pub(crate) fn selector(operation: &AtomicOperation) -> Result<Document, DocumentStoreError> {
    let target = doc! { "_id": operation.target };

    Ok(match &operation.guard {
        Some(guard) => doc! { "$and": [target, MongoQueryTranslator.visit_expr(guard)?] },
        None => target,
    })
}

/// The update document applying a mutation in one request.
pub(crate) fn update_document(mutation: &Mutation) -> Document {
    match mutation {
        Mutation::Set { field, value } => doc! {
            "$set": { field.clone(): ValueSanitizer::sanitize_value(value) },
        },
        Mutation::Increment { field, delta } | Mutation::GuardedAdjust { field, delta } => doc! {
            "$inc": { field.clone(): delta.clone() },
        },
        Mutation::CappedPush { field, values, cap } => doc! {
            "$push": {
                field.clone(): {
                    "$each": values.iter().map(ValueSanitizer::sanitize_value).collect::<Vec<_>>(),
                    "$slice": -(*cap as i64),
                },
            },
        },
    }
}
