//! Index declarations and query coverage checks.
//!
//! Indexes are declared once at startup through [`IndexAdvisor::register_index`]. Every query
//! passes through [`IndexAdvisor::validate`] before reaching the store. A query is accepted only
//! when some index covers it under the equality–sort–range rule:
//!
//! 1. the equality-filtered fields occupy the first keys of the index (in any order),
//! 2. the sort fields come next, in order, with all directions either matching or all reversed,
//! 3. the range-filtered fields come last (in any order).
//!
//! An index that covers the filters but not the sort is still accepted; the match then carries an
//! [`IndexWarning::InMemorySort`] because the store has to sort the candidates itself.
//!
//! Every collection also has an implicit primary index on `_id`.
//!
//! # Example
//!
//! ```ignore
//! use docguard::index::{IndexAdvisor, IndexDefinition};
//!
//! let mut advisor = IndexAdvisor::new();
//! advisor.register_index(
//!     IndexDefinition::builder("orders")
//!         .asc("customer_id")
//!         .desc("created_at")
//!         .build(),
//! )?;
//! ```

use std::{cmp::Ordering, collections::HashSet, fmt};

use bson::Bson;

use crate::{
    error::{DocumentStoreError, RepositoryError, RepositoryResult},
    query::{Expr, FieldOp, QuerySpec, QueryVisitor, Sort, SortDirection, is_id_field},
    value::{Comparable, ID_FIELD},
};

/// One key of a compound index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    /// Indexed field (dotted paths allowed).
    pub field: String,
    /// Direction of the key.
    pub direction: SortDirection,
}

/// A declared index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// The collection the index belongs to.
    pub collection: String,
    /// Explicit index name. Derived from the keys when absent.
    pub name: Option<String>,
    /// Keys in index order.
    pub keys: Vec<IndexKey>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Restricts the index to documents matching this predicate.
    pub partial_filter: Option<Expr>,
}

impl IndexDefinition {
    /// Creates a builder for an index on `collection`.
    pub fn builder(collection: impl Into<String>) -> IndexDefinitionBuilder {
        IndexDefinitionBuilder::new(collection.into())
    }

    /// The implicit primary index every collection has.
    pub fn primary(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: Some("_id_".to_string()),
            keys: vec![IndexKey { field: ID_FIELD.to_string(), direction: SortDirection::Asc }],
            unique: true,
            partial_filter: None,
        }
    }

    /// Whether this is the implicit primary index.
    pub fn is_primary(&self) -> bool {
        self.keys.len() == 1 && is_id_field(&self.keys[0].field)
    }

    /// The index name, e.g. `customer_id_1_created_at_-1` when no explicit name was given.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|key| format!("{}_{}", key.field, key.direction.as_i32()))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// The field-order signature two indexes must not share.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}",
            self.collection,
            self.keys
                .iter()
                .map(|key| format!("{}:{}", key.field, key.direction.as_i32()))
                .collect::<Vec<_>>()
                .join(",")
        )
    }

    /// Indexed field names in key order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.field.as_str())
    }

    fn validate(&self) -> RepositoryResult<()> {
        if self.collection.is_empty() {
            return Err(RepositoryError::Validation("index has no collection".into()));
        }
        if self.keys.is_empty() {
            return Err(RepositoryError::Validation(format!(
                "index on {} has no keys",
                self.collection
            )));
        }

        let mut seen = HashSet::new();
        for key in &self.keys {
            if key.field.is_empty() || key.field.starts_with('$') {
                return Err(RepositoryError::Validation(format!(
                    "invalid index field {:?}",
                    key.field
                )));
            }
            if is_id_field(&key.field) {
                return Err(RepositoryError::Validation(
                    "the _id field is indexed implicitly".into(),
                ));
            }
            if !seen.insert(key.field.as_str()) {
                return Err(RepositoryError::Validation(format!(
                    "field {} appears twice in index",
                    key.field
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`IndexDefinition`].
#[derive(Debug, Clone)]
pub struct IndexDefinitionBuilder {
    definition: IndexDefinition,
}

impl IndexDefinitionBuilder {
    fn new(collection: String) -> Self {
        Self {
            definition: IndexDefinition {
                collection,
                name: None,
                keys: Vec::new(),
                unique: false,
                partial_filter: None,
            },
        }
    }

    /// Appends an ascending key.
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.key(field, SortDirection::Asc)
    }

    /// Appends a descending key.
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.key(field, SortDirection::Desc)
    }

    /// Appends a key with an explicit direction.
    pub fn key(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.definition.keys.push(IndexKey { field: field.into(), direction });
        self
    }

    /// Makes the index enforce uniqueness.
    pub fn unique(mut self) -> Self {
        self.definition.unique = true;
        self
    }

    /// Restricts the index to documents matching `filter`.
    pub fn partial(mut self, filter: Expr) -> Self {
        self.definition.partial_filter = Some(filter);
        self
    }

    /// Gives the index an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.definition.name = Some(name.into());
        self
    }

    /// Builds the definition.
    pub fn build(self) -> IndexDefinition {
        self.definition
    }
}

/// A non-fatal observation about how a query will be served.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexWarning {
    /// The matched index serves the filters, but the store must sort the results itself.
    InMemorySort {
        /// Name of the matched index.
        index: String,
        /// The sort that is not served by the index.
        sort: Vec<Sort>,
    },
}

impl fmt::Display for IndexWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexWarning::InMemorySort { index, sort } => write!(
                f,
                "index {index} does not serve sort [{}]; results are sorted in memory",
                sort.iter()
                    .map(|s| format!("{} {}", s.field, s.direction.as_i32()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// The outcome of a successful [`IndexAdvisor::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    /// The index serving the query.
    pub index: IndexDefinition,
    /// Effective result order, always terminated by the `_id` tie-breaker.
    pub ordering: Vec<Sort>,
    /// Warnings about how the query will be served.
    pub warnings: Vec<IndexWarning>,
    /// Number of index keys used by the query.
    pub prefix_len: usize,
}

impl IndexMatch {
    /// Whether the index serves the requested order as well as the filters.
    pub fn covers_sort(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Plan {
    prefix_len: usize,
    covers_sort: bool,
}

impl Plan {
    // Longer prefixes win, then sort coverage, then narrower indexes.
    fn rank(&self, index: &IndexDefinition) -> (usize, bool, std::cmp::Reverse<usize>) {
        (self.prefix_len, self.covers_sort, std::cmp::Reverse(index.keys.len()))
    }
}

/// Registry of declared indexes.
///
/// The registry is populated at startup and treated as immutable afterwards; the repository
/// keeps it behind an `Arc` and reads it without synchronization.
#[derive(Debug, Clone, Default)]
pub struct IndexAdvisor {
    indexes: Vec<IndexDefinition>,
}

impl IndexAdvisor {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::DuplicateIndex`] if an index with the same field-order signature, or
    ///   the same name, already exists on the collection.
    /// - [`RepositoryError::Validation`] if the definition is malformed.
    pub fn register_index(&mut self, definition: IndexDefinition) -> RepositoryResult<()> {
        definition.validate()?;

        let signature = definition.signature();
        let name = definition.name();

        if let Some(existing) = self.indexes.iter().find(|existing| {
            existing.collection == definition.collection
                && (existing.signature() == signature || existing.name() == name)
        }) {
            return Err(RepositoryError::DuplicateIndex(format!(
                "{} on collection {}",
                existing.name(),
                existing.collection
            )));
        }

        log::debug!("registered index {} ({})", name, signature);
        self.indexes.push(definition);

        Ok(())
    }

    /// All registered indexes, in registration order.
    pub fn all(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Registered indexes of one collection.
    pub fn indexes<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a IndexDefinition> + 'a {
        self.indexes
            .iter()
            .filter(move |index| index.collection == collection)
    }

    /// Selects the index serving `spec` on `collection`.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Validation`] if the query is structurally unsound.
    /// - [`RepositoryError::UnindexedQuery`] if no index covers the query.
    pub fn validate(&self, collection: &str, spec: &QuerySpec) -> RepositoryResult<IndexMatch> {
        spec.validate()?;

        let primary = IndexDefinition::primary(collection);
        let mut best: Option<(&IndexDefinition, Plan)> = None;

        for index in std::iter::once(&primary).chain(self.indexes(collection)) {
            let Some(plan) = plan(index, spec) else {
                continue;
            };

            let better = match &best {
                None => true,
                Some((current, current_plan)) => {
                    plan.rank(index).cmp(&current_plan.rank(current)) == Ordering::Greater
                }
            };

            if better {
                best = Some((index, plan));
            }
        }

        let Some((index, plan)) = best else {
            return Err(RepositoryError::UnindexedQuery {
                collection: collection.to_string(),
                reason: describe(spec),
            });
        };

        let mut warnings = Vec::new();
        if !plan.covers_sort {
            let warning = IndexWarning::InMemorySort {
                index: index.name(),
                sort: spec.sort.clone(),
            };
            log::warn!("query on {collection}: {warning}");
            warnings.push(warning);
        }

        log::debug!(
            "query on {collection} served by index {} (prefix {})",
            index.name(),
            plan.prefix_len
        );

        Ok(IndexMatch {
            index: index.clone(),
            ordering: ordering(index, spec),
            warnings,
            prefix_len: plan.prefix_len,
        })
    }
}

/// Matches `spec` against `index` under the equality, sort, range rule.
///
/// When the index serves the sort, any range field that is one of the sort fields counts as
/// covered by the sort segment, not just the last one. A range on a leading sort field still
/// bounds a contiguous run of the index.
fn plan(index: &IndexDefinition, spec: &QuerySpec) -> Option<Plan> {
    let keys = &index.keys;
    let equality: HashSet<&str> = spec.equality_fields().collect();
    let equality_len = equality.len();

    if keys.len() < equality_len
        || !keys[..equality_len]
            .iter()
            .all(|key| equality.contains(key.field.as_str()))
    {
        return None;
    }

    let sort = effective_sort(spec, &equality);
    let covers_sort = sort_matches(&keys[equality_len..], &sort);

    let mut position = equality_len;
    let mut consumed: HashSet<&str> = HashSet::new();
    if covers_sort {
        position += sort.len();
        consumed.extend(sort.iter().map(|s| s.field.as_str()));
    }

    let range: HashSet<&str> = spec
        .range_fields()
        .filter(|field| !consumed.contains(field))
        .collect();

    if keys.len() < position + range.len()
        || !keys[position..position + range.len()]
            .iter()
            .all(|key| range.contains(key.field.as_str()))
    {
        return None;
    }

    let prefix_len = position + range.len();

    // Without sort coverage an index that serves nothing is no match at all.
    if !covers_sort && prefix_len == 0 {
        return None;
    }

    if let Some(partial) = &index.partial_filter {
        let mut coverage = PartialFilterCoverage { spec };
        if !coverage.visit_expr(partial).unwrap_or(false) {
            return None;
        }
    }

    Some(Plan { prefix_len, covers_sort })
}

fn effective_sort<'a>(spec: &'a QuerySpec, equality: &HashSet<&str>) -> Vec<&'a Sort> {
    spec.sort
        .iter()
        .filter(|sort| !equality.contains(sort.field.as_str()))
        .collect()
}

fn sort_matches(keys: &[IndexKey], sort: &[&Sort]) -> bool {
    if sort.is_empty() {
        return true;
    }
    if keys.len() < sort.len() {
        return false;
    }

    let pairs = || keys.iter().zip(sort.iter());
    let same_fields = pairs().all(|(key, sort)| key.field == sort.field);
    let forward = pairs().all(|(key, sort)| key.direction == sort.direction);
    let backward = pairs().all(|(key, sort)| key.direction == sort.direction.reverse());

    same_fields && (forward || backward)
}

fn ordering(index: &IndexDefinition, spec: &QuerySpec) -> Vec<Sort> {
    let equality: HashSet<&str> = spec.equality_fields().collect();

    let mut ordering: Vec<Sort> = effective_sort(spec, &equality)
        .into_iter()
        .cloned()
        .collect();

    if ordering.is_empty() {
        ordering = index
            .keys
            .iter()
            .filter(|key| !equality.contains(key.field.as_str()) && !is_id_field(&key.field))
            .map(|key| Sort::new(key.field.as_str(), key.direction))
            .collect();
    }

    match ordering.iter().position(|sort| is_id_field(&sort.field)) {
        Some(position) => ordering.truncate(position + 1),
        None => {
            let direction = ordering
                .last()
                .map(|sort| sort.direction)
                .unwrap_or(SortDirection::Asc);
            ordering.push(Sort::new(ID_FIELD, direction));
        }
    }

    ordering
}

fn describe(spec: &QuerySpec) -> String {
    let join = |fields: Vec<&str>| fields.join(", ");

    format!(
        "equality [{}], sort [{}], range [{}]",
        join(spec.equality_fields().collect()),
        join(spec.sort.iter().map(|s| s.field.as_str()).collect()),
        join(spec.range_fields().collect()),
    )
}

// Decides whether the query's own clauses guarantee that every matching document also satisfies
// an index's partial filter. Anything that cannot be proven counts as not covered.
struct PartialFilterCoverage<'a> {
    spec: &'a QuerySpec,
}

impl QueryVisitor for PartialFilterCoverage<'_> {
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

    fn visit_not(&mut self, _expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(false)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        if !should_exist {
            return Ok(false);
        }

        Ok(match self.spec.equality_value(field) {
            Some(value) => !matches!(value, Bson::Null),
            None => self.spec.range_for(field).is_some(),
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let target = Comparable::from(value);

        if let Some(bound) = self.spec.equality_value(field) {
            let bound = Comparable::from(bound);
            let ordering = bound.partial_cmp(&target);

            return Ok(match op {
                FieldOp::Eq => bound == target,
                FieldOp::Ne => bound != target,
                FieldOp::Gt => ordering == Some(Ordering::Greater),
                FieldOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                FieldOp::Lt => ordering == Some(Ordering::Less),
                FieldOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                _ => false,
            });
        }

        let Some(range) = self.spec.range_for(field) else {
            return Ok(false);
        };

        Ok(match op {
            FieldOp::Gt | FieldOp::Gte => range.lower.as_ref().is_some_and(|lower| {
                match Comparable::from(&lower.value).partial_cmp(&target) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => *op == FieldOp::Gte || !lower.inclusive,
                    _ => false,
                }
            }),
            FieldOp::Lt | FieldOp::Lte => range.upper.as_ref().is_some_and(|upper| {
                match Comparable::from(&upper.value).partial_cmp(&target) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => *op == FieldOp::Lte || !upper.inclusive,
                    _ => false,
                }
            }),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use proptest::prelude::*;

    fn advisor(indexes: Vec<IndexDefinition>) -> IndexAdvisor {
        let mut advisor = IndexAdvisor::new();
        for index in indexes {
            advisor.register_index(index).unwrap();
        }
        advisor
    }

    fn orders_index() -> IndexDefinition {
        IndexDefinition::builder("orders")
            .asc("status")
            .desc("created_at")
            .asc("total")
            .build()
    }

    #[test]
    fn duplicate_signature_is_rejected() {
        let mut advisor = advisor(vec![orders_index()]);

        let err = advisor.register_index(orders_index()).unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateIndex(_)));

        // Same fields, different direction: a different signature.
        advisor
            .register_index(
                IndexDefinition::builder("orders")
                    .asc("status")
                    .asc("created_at")
                    .asc("total")
                    .build(),
            )
            .unwrap();

        // Same signature on another collection is fine.
        advisor
            .register_index(
                IndexDefinition::builder("invoices")
                    .asc("status")
                    .desc("created_at")
                    .asc("total")
                    .build(),
            )
            .unwrap();
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        let mut advisor = IndexAdvisor::new();

        let empty = IndexDefinition::builder("orders").build();
        assert!(matches!(advisor.register_index(empty), Err(RepositoryError::Validation(_))));

        let id = IndexDefinition::builder("orders").asc("_id").build();
        assert!(matches!(advisor.register_index(id), Err(RepositoryError::Validation(_))));

        let repeated = IndexDefinition::builder("orders").asc("a").desc("a").build();
        assert!(matches!(advisor.register_index(repeated), Err(RepositoryError::Validation(_))));
    }

    #[test]
    fn equality_sort_range_is_covered() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder()
            .eq("status", "open")
            .sort("created_at", SortDirection::Desc)
            .gte("total", 100)
            .build();

        let matched = advisor.validate("orders", &spec).unwrap();
        assert_eq!(matched.index.name(), "status_1_created_at_-1_total_1");
        assert_eq!(matched.prefix_len, 3);
        assert!(matched.covers_sort());
        assert_eq!(
            matched.ordering,
            vec![Sort::new("created_at", SortDirection::Desc), Sort::new("_id", SortDirection::Desc)]
        );
    }

    #[test]
    fn reversed_sort_is_served_by_walking_the_index_backwards() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder()
            .eq("status", "open")
            .sort("created_at", SortDirection::Asc)
            .build();

        let matched = advisor.validate("orders", &spec).unwrap();
        assert!(matched.covers_sort());
    }

    #[test]
    fn mixed_direction_sort_must_match_or_fully_reverse() {
        let advisor = advisor(vec![
            IndexDefinition::builder("events").asc("a").desc("b").build(),
        ]);

        let reversed = QuerySpec::builder()
            .sort("a", SortDirection::Desc)
            .sort("b", SortDirection::Asc)
            .build();
        assert!(advisor.validate("events", &reversed).unwrap().covers_sort());

        let mixed = QuerySpec::builder()
            .sort("a", SortDirection::Asc)
            .sort("b", SortDirection::Asc)
            .build();
        let err = advisor.validate("events", &mixed).unwrap_err();
        assert!(matches!(err, RepositoryError::UnindexedQuery { .. }));
    }

    #[test]
    fn range_before_sort_violates_the_rule() {
        let advisor = advisor(vec![
            IndexDefinition::builder("orders").asc("status").asc("total").asc("created_at").build(),
        ]);

        // Filters are covered (status, total) but the sort on created_at is not: warning.
        let spec = QuerySpec::builder()
            .eq("status", "open")
            .gt("total", 5)
            .sort("created_at", SortDirection::Asc)
            .build();

        let matched = advisor.validate("orders", &spec).unwrap();
        assert!(!matched.covers_sort());
        assert!(matches!(matched.warnings[0], IndexWarning::InMemorySort { .. }));
        assert_eq!(
            matched.ordering,
            vec![Sort::new("created_at", SortDirection::Asc), Sort::new("_id", SortDirection::Asc)]
        );
    }

    #[test]
    fn range_on_a_leading_sort_field_is_covered_by_the_sort() {
        let advisor = advisor(vec![
            IndexDefinition::builder("events").asc("day").asc("seq").build(),
        ]);
        let spec = QuerySpec::builder()
            .gte("day", 3)
            .sort("day", SortDirection::Asc)
            .sort("seq", SortDirection::Asc)
            .build();

        let matched = advisor.validate("events", &spec).unwrap();
        assert!(matched.covers_sort());
        assert_eq!(matched.prefix_len, 2);
        assert!(matched.warnings.is_empty());
    }

    #[test]
    fn unindexed_equality_is_rejected() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder().eq("customer", "c-1").build();

        let err = advisor.validate("orders", &spec).unwrap_err();
        assert!(matches!(err, RepositoryError::UnindexedQuery { .. }));
    }

    #[test]
    fn equality_must_come_first() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder().eq("created_at", 5).build();

        assert!(advisor.validate("orders", &spec).is_err());
    }

    #[test]
    fn sort_only_on_unindexed_field_is_rejected() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder().sort("customer", SortDirection::Asc).build();

        assert!(matches!(
            advisor.validate("orders", &spec),
            Err(RepositoryError::UnindexedQuery { .. })
        ));
    }

    #[test]
    fn primary_index_serves_unfiltered_and_id_queries() {
        let advisor = IndexAdvisor::new();

        let all = advisor.validate("orders", &QuerySpec::default()).unwrap();
        assert!(all.index.is_primary());
        assert_eq!(all.ordering, vec![Sort::new("_id", SortDirection::Asc)]);

        let newest_first = QuerySpec::builder().sort("_id", SortDirection::Desc).build();
        let matched = advisor.validate("orders", &newest_first).unwrap();
        assert!(matched.covers_sort());
        assert_eq!(matched.ordering, vec![Sort::new("_id", SortDirection::Desc)]);
    }

    #[test]
    fn longest_prefix_wins() {
        let advisor = advisor(vec![
            IndexDefinition::builder("orders").asc("status").build(),
            orders_index(),
        ]);
        let spec = QuerySpec::builder()
            .eq("status", "open")
            .sort("created_at", SortDirection::Desc)
            .build();

        let matched = advisor.validate("orders", &spec).unwrap();
        assert_eq!(matched.prefix_len, 2);
        assert_eq!(matched.index.keys.len(), 3);
    }

    #[test]
    fn equality_order_does_not_matter_and_sort_on_bound_field_is_free() {
        let advisor = advisor(vec![
            IndexDefinition::builder("users").asc("tenant").asc("role").asc("name").build(),
        ]);
        let spec = QuerySpec::builder()
            .eq("role", "admin")
            .eq("tenant", "t1")
            .sort("tenant", SortDirection::Desc)
            .sort("name", SortDirection::Asc)
            .build();

        let matched = advisor.validate("users", &spec).unwrap();
        assert!(matched.covers_sort());
        assert_eq!(matched.prefix_len, 3);
        assert_eq!(matched.ordering[0], Sort::new("name", SortDirection::Asc));
    }

    #[test]
    fn unsorted_query_follows_index_order() {
        let advisor = advisor(vec![orders_index()]);
        let spec = QuerySpec::builder().eq("status", "open").build();

        let matched = advisor.validate("orders", &spec).unwrap();
        assert_eq!(
            matched.ordering,
            vec![
                Sort::new("created_at", SortDirection::Desc),
                Sort::new("total", SortDirection::Asc),
                Sort::new("_id", SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn partial_index_needs_implied_predicate() {
        let advisor = advisor(vec![
            IndexDefinition::builder("tasks")
                .asc("owner")
                .partial(Filter::eq("archived", false))
                .build(),
        ]);

        let plain = QuerySpec::builder().eq("owner", "ana").build();
        assert!(advisor.validate("tasks", &plain).is_err());

        // archived is not indexed, so this spec is not covered either, even though it implies
        // the partial filter.
        let implied = QuerySpec::builder().eq("owner", "ana").eq("archived", false).build();
        assert!(advisor.validate("tasks", &implied).is_err());

        let advisor = self::advisor(vec![
            IndexDefinition::builder("tasks")
                .asc("archived")
                .asc("owner")
                .partial(Filter::eq("archived", false))
                .build(),
        ]);
        assert!(advisor.validate("tasks", &implied).is_ok());

        let archived = QuerySpec::builder().eq("owner", "ana").eq("archived", true).build();
        assert!(advisor.validate("tasks", &archived).is_err());
    }

    #[test]
    fn partial_index_range_implication() {
        let advisor = advisor(vec![
            IndexDefinition::builder("products")
                .asc("price")
                .partial(Filter::gt("price", 0))
                .build(),
        ]);

        let positive = QuerySpec::builder().gte("price", 10).build();
        assert!(advisor.validate("products", &positive).is_ok());

        let from_zero = QuerySpec::builder().gte("price", 0).build();
        assert!(advisor.validate("products", &from_zero).is_err());

        let above_zero = QuerySpec::builder().gt("price", 0).build();
        assert!(advisor.validate("products", &above_zero).is_ok());
    }

    fn field_names() -> Vec<String> {
        ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect()
    }

    proptest! {
        // Any split of an index's keys into equality, sort and range segments is covered.
        #[test]
        fn esr_prefix_queries_are_covered(
            len in 1usize..=6,
            eq in 0usize..=6,
            sort in 0usize..=6,
            range in 0usize..=6,
            reverse in any::<bool>(),
        ) {
            let fields = field_names();
            let index = fields[..len].iter().fold(IndexDefinition::builder("c"), |b, f| b.asc(f.as_str())).build();
            let advisor = advisor(vec![index]);

            let eq = eq.min(len);
            let sort = sort.min(len - eq);
            let range = range.min(len - eq - sort);

            let mut builder = QuerySpec::builder();
            for field in &fields[..eq] {
                builder = builder.eq(field.as_str(), 1);
            }
            for field in &fields[eq..eq + sort] {
                let direction = if reverse { SortDirection::Desc } else { SortDirection::Asc };
                builder = builder.sort(field.as_str(), direction);
            }
            for field in &fields[eq + sort..eq + sort + range] {
                builder = builder.gt(field.as_str(), 0);
            }

            let matched = advisor.validate("c", &builder.build()).unwrap();
            prop_assert!(matched.covers_sort());
        }

        // Filtering on a field that no index mentions is never covered.
        #[test]
        fn unknown_equality_field_is_rejected(len in 1usize..=6, eq in 0usize..=6) {
            let fields = field_names();
            let index = fields[..len].iter().fold(IndexDefinition::builder("c"), |b, f| b.asc(f.as_str())).build();
            let advisor = advisor(vec![index]);

            let mut builder = QuerySpec::builder().eq("unknown", 1);
            for field in &fields[..eq.min(len)] {
                builder = builder.eq(field.as_str(), 1);
            }

            let rejected = matches!(
                advisor.validate("c", &builder.build()),
                Err(RepositoryError::UnindexedQuery { .. })
            );
            prop_assert!(rejected);
        }
    }
}
