//! Query construction and filtering API.
//!
//! Two levels of query exist:
//!
//! - [`QuerySpec`] is what callers hand to the repository: equality filters, range filters, a
//!   sort clause and a limit. Its shape is what the [`IndexAdvisor`](crate::index::IndexAdvisor)
//!   checks against declared indexes.
//! - [`Query`] is what backends execute: an arbitrary filter [`Expr`], a multi-key sort and a
//!   limit. The paginator lowers a `QuerySpec` plus a cursor into a `Query`.
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static constructors for filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! # Example
//!
//! ```ignore
//! use docguard::query::{QuerySpec, SortDirection};
//!
//! let spec = QuerySpec::builder()
//!     .eq("status", "open")
//!     .sort("created_at", SortDirection::Desc)
//!     .gte("created_at", since)
//!     .limit(20)
//!     .build();
//! ```

use std::collections::HashSet;

use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DocumentStoreError, RepositoryError, RepositoryResult},
    value::ID_FIELD,
};

/// Sort direction for query results and index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    /// The numeric form used by document stores (`1` / `-1`).
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    /// Creates a sort specification.
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Array contains any of the values.
    AnyOf,
    /// Array contains none of the values.
    NoneOf,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates. They also serve as guard predicates for
/// atomic operations and as partial-filter predicates for indexes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Helper struct for constructing filter expressions.
///
/// ```ignore
/// use docguard::query::Filter;
///
/// let expr = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field (string or array) does not contain the specified value.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the array field contains any of the specified values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the array field contains none of the specified values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

/// A query as executed by a storage backend.
///
/// Backends apply the filter, order by every entry of `sort` (the last entry is normally the
/// `_id` tie-breaker) and return at most `limit` documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Fluent builder for [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort::new(field, direction));
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// One side of a range filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    /// The bounding value.
    pub value: Bson,
    /// Whether documents equal to `value` are included.
    pub inclusive: bool,
}

/// A range restriction on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    /// The field being restricted.
    pub field: String,
    /// Lower bound, if any.
    pub lower: Option<RangeBound>,
    /// Upper bound, if any.
    pub upper: Option<RangeBound>,
}

impl RangeFilter {
    fn to_exprs(&self) -> Vec<Expr> {
        let mut exprs = Vec::with_capacity(2);

        if let Some(lower) = &self.lower {
            exprs.push(match lower.inclusive {
                true => Filter::gte(self.field.as_str(), lower.value.clone()),
                false => Filter::gt(self.field.as_str(), lower.value.clone()),
            });
        }
        if let Some(upper) = &self.upper {
            exprs.push(match upper.inclusive {
                true => Filter::lte(self.field.as_str(), upper.value.clone()),
                false => Filter::lt(self.field.as_str(), upper.value.clone()),
            });
        }

        exprs
    }
}

/// The shape of a caller's query: equality filters, range filters, a sort clause and a limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// `field = value` filters.
    pub equality: Vec<(String, Bson)>,
    /// Range filters, at most one per field.
    pub range: Vec<RangeFilter>,
    /// Requested ordering, most significant first.
    pub sort: Vec<Sort>,
    /// Maximum number of documents per page.
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Creates a new builder.
    pub fn builder() -> QuerySpecBuilder {
        QuerySpecBuilder::default()
    }

    /// Names of the equality-filtered fields.
    pub fn equality_fields(&self) -> impl Iterator<Item = &str> {
        self.equality.iter().map(|(field, _)| field.as_str())
    }

    /// Names of the range-filtered fields.
    pub fn range_fields(&self) -> impl Iterator<Item = &str> {
        self.range.iter().map(|range| range.field.as_str())
    }

    /// The equality value for `field`, if it is equality-filtered.
    pub fn equality_value(&self, field: &str) -> Option<&Bson> {
        self.equality
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// The range restriction on `field`, if any.
    pub fn range_for(&self, field: &str) -> Option<&RangeFilter> {
        self.range.iter().find(|range| range.field == field)
    }

    /// Lowers the equality and range filters into a single filter expression.
    pub fn to_filter(&self) -> Option<Expr> {
        let mut exprs: Vec<Expr> = self
            .equality
            .iter()
            .map(|(field, value)| Filter::eq(field.as_str(), value.clone()))
            .collect();

        exprs.extend(self.range.iter().flat_map(RangeFilter::to_exprs));

        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::And(exprs)),
        }
    }

    /// Checks the structural soundness of the query without consulting any index.
    pub fn validate(&self) -> RepositoryResult<()> {
        let mut seen = HashSet::new();

        for field in self.equality_fields() {
            check_field_name(field)?;
            if !seen.insert(field) {
                return Err(RepositoryError::Validation(format!(
                    "field {field} is filtered more than once"
                )));
            }
        }

        for range in &self.range {
            check_field_name(&range.field)?;
            if !seen.insert(range.field.as_str()) {
                return Err(RepositoryError::Validation(format!(
                    "field {} is filtered more than once",
                    range.field
                )));
            }
            if range.lower.is_none() && range.upper.is_none() {
                return Err(RepositoryError::Validation(format!(
                    "range filter on {} has no bounds",
                    range.field
                )));
            }
        }

        let mut sorted = HashSet::new();
        for sort in &self.sort {
            check_field_name(&sort.field)?;
            if !sorted.insert(sort.field.as_str()) {
                return Err(RepositoryError::Validation(format!(
                    "field {} is sorted more than once",
                    sort.field
                )));
            }
        }

        if self.limit == Some(0) {
            return Err(RepositoryError::Validation("limit must be at least 1".into()));
        }

        Ok(())
    }
}

fn check_field_name(field: &str) -> RepositoryResult<()> {
    if field.is_empty() || field.starts_with('$') || field.split('.').any(str::is_empty) {
        return Err(RepositoryError::Validation(format!("invalid field name {field:?}")));
    }

    Ok(())
}

/// Fluent builder for [`QuerySpec`].
///
/// Range methods on the same field merge into one [`RangeFilter`].
#[derive(Debug, Clone, Default)]
pub struct QuerySpecBuilder {
    spec: QuerySpec,
}

impl QuerySpecBuilder {
    /// Adds an equality filter.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.spec.equality.push((field.into(), value.into()));
        self
    }

    /// Adds an exclusive lower bound.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.lower(field.into(), value.into(), false)
    }

    /// Adds an inclusive lower bound.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.lower(field.into(), value.into(), true)
    }

    /// Adds an exclusive upper bound.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.upper(field.into(), value.into(), false)
    }

    /// Adds an inclusive upper bound.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.upper(field.into(), value.into(), true)
    }

    /// Appends a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.spec.sort.push(Sort::new(field, direction));
        self
    }

    /// Sets the page size limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    /// Builds and returns the final query spec.
    pub fn build(self) -> QuerySpec {
        self.spec
    }

    fn lower(mut self, field: String, value: Bson, inclusive: bool) -> Self {
        self.range_mut(field).lower = Some(RangeBound { value, inclusive });
        self
    }

    fn upper(mut self, field: String, value: Bson, inclusive: bool) -> Self {
        self.range_mut(field).upper = Some(RangeBound { value, inclusive });
        self
    }

    fn range_mut(&mut self, field: String) -> &mut RangeFilter {
        let position = match self.spec.range.iter().position(|range| range.field == field) {
            Some(position) => position,
            None => {
                self.spec.range.push(RangeFilter { field, lower: None, upper: None });
                self.spec.range.len() - 1
            }
        };

        &mut self.spec.range[position]
    }
}

/// Visitor over filter expressions, used by backends to evaluate or translate them.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

/// Whether `field` names the document identifier.
pub fn is_id_field(field: &str) -> bool {
    field == ID_FIELD
}
