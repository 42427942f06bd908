//! Value comparison shared by query evaluation, sorting and index planning.
//!
//! Filters compare values only within the same type bracket (a number is never greater than a
//! string), while sorting needs a total order. Both are expressed over [`Comparable`].

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, Timestamp, datetime::DateTime, oid::ObjectId};

/// Reserved field name addressing a document's identifier in filters and sorts.
pub const ID_FIELD: &str = "_id";

/// Type-erased, comparable representation of BSON values.
///
/// Integers and floats are normalized to `f64`. Missing fields, `null` and `undefined` are all
/// represented as [`Comparable::Null`]. Symbols compare as strings.
#[derive(Debug)]
pub enum Comparable<'a> {
    /// Lowest possible value
    MinKey,
    /// Null or missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Binary payload, including UUIDs
    Binary(&'a [u8]),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    ObjectId(ObjectId),
    Timestamp(Timestamp),
    /// Regular expression pattern and options
    Regex(&'a str, &'a str),
    /// JavaScript source
    Code(&'a str),
    /// Decimal128, DB pointers and scoped code, ordered by their rendering
    Opaque(String),
    /// Highest possible value
    MaxKey,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::MinKey => Comparable::MinKey,
            Bson::MaxKey => Comparable::MaxKey,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) | Bson::Symbol(value) => Comparable::String(value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            Bson::ObjectId(oid) => Comparable::ObjectId(*oid),
            Bson::Timestamp(ts) => Comparable::Timestamp(*ts),
            Bson::RegularExpression(regex) => Comparable::Regex(regex.pattern.as_str(), regex.options.as_str()),
            Bson::JavaScriptCode(code) => Comparable::Code(code),
            other => Comparable::Opaque(other.to_string()),
        }
    }
}

impl<'a> From<Option<&'a Bson>> for Comparable<'a> {
    fn from(value: Option<&'a Bson>) -> Self {
        value.map(Comparable::from).unwrap_or(Comparable::Null)
    }
}

impl<'a> Comparable<'a> {
    // Cross-type ordering used for sorting, following the document store's BSON order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::MinKey => 0,
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Timestamp(_) => 10,
            Comparable::Regex(..) => 11,
            Comparable::Code(_) => 12,
            Comparable::Opaque(_) => 13,
            Comparable::MaxKey => 14,
        }
    }

    /// Total order used when sorting documents.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => self.partial_cmp(other).unwrap_or(Ordering::Equal),
            unequal => unequal,
        }
    }

    /// Whether this value is null (or was missing).
    pub fn is_null(&self) -> bool {
        matches!(self, Comparable::Null)
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::MinKey, Comparable::MinKey) | (Comparable::MaxKey, Comparable::MaxKey) => true,
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => a == b,
            (Comparable::Regex(a, x), Comparable::Regex(b, y)) => a == b && x == y,
            (Comparable::Code(a), Comparable::Code(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            (Comparable::MinKey, Comparable::MinKey) | (Comparable::MaxKey, Comparable::MaxKey) => Some(Ordering::Equal),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => {
                (a.time, a.increment).partial_cmp(&(b.time, b.increment))
            }
            (Comparable::Regex(a, x), Comparable::Regex(b, y)) => (a, x).partial_cmp(&(b, y)),
            (Comparable::Code(a), Comparable::Code(b)) => a.partial_cmp(b),
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Looks up a possibly dotted path (`"address.city"`) inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Writes `value` at a possibly dotted path, creating intermediate documents as needed.
///
/// Returns `false` when an intermediate segment exists but is not a document.
pub fn assign(document: &mut Document, path: &str, value: Bson) -> bool {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            true
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => assign(inner, rest, value),
                _ => false,
            }
        }
    }
}

/// Adds two numeric values the way document stores do: integers stay integers (widening from
/// 32 to 64 bits on overflow) and anything involving a double yields a double.
pub fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        }),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            as_i64(current)?.checked_add(as_i64(delta)?).map(Bson::Int64)
        }
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_), Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            Some(Bson::Double(as_f64(current)? + as_f64(delta)?))
        }
        _ => None,
    }
}

/// Whether a value is one of the numeric BSON types.
pub fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
