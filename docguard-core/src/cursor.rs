//! Cursor-based pagination.
//!
//! A [`Cursor`] is an opaque token naming the position of the last document of a page in the
//! query's ordering. The next page is everything strictly after that position, so pagination
//! needs no server-side state and never counts the whole result set.
//!
//! # Token format
//!
//! ```text
//! base64url( bson{ v, ordering, values } || tag )
//! ```
//!
//! The tag is a CRC-32 of the payload, or a SHA-256 digest of `secret || payload` when a signing
//! secret is configured. Any mismatch, truncation or unknown version makes the token invalid.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bson::{Bson, Uuid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    backend::StoreBackend,
    deadline::Deadline,
    document::StoredDocument,
    error::{RepositoryError, RepositoryResult},
    index::IndexMatch,
    page::Page,
    query::{Expr, Filter, Query, QuerySpec, Sort, SortDirection, is_id_field},
    value::{ID_FIELD, lookup},
};

const VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 4;
const SIGNATURE_LEN: usize = 32;

/// An opaque pagination token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the cursor, returning the token text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Cursor(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Cursor(token.to_string())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The decoded content of a cursor: the ordering it was issued for and the ordering-key values
/// of the last document seen. The final entry is always the `_id` tie-breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorKey {
    /// Ordering the token belongs to.
    pub ordering: Vec<Sort>,
    /// One value per ordering entry.
    pub values: Vec<Bson>,
}

impl CursorKey {
    /// Reads the ordering-key values of a stored document. Missing fields read as null.
    pub fn from_document(ordering: &[Sort], id: &Uuid, body: &bson::Document) -> Self {
        let values = ordering
            .iter()
            .map(|sort| match is_id_field(&sort.field) {
                true => Bson::from(*id),
                false => lookup(body, &sort.field).cloned().unwrap_or(Bson::Null),
            })
            .collect();

        Self { ordering: ordering.to_vec(), values }
    }

    /// Filter selecting the documents strictly after this key in its ordering.
    ///
    /// Null sorts before every other value, so "after null" ascending is "not null", and nothing
    /// follows null descending.
    pub fn after_filter(&self) -> Expr {
        let mut branches = Vec::with_capacity(self.values.len());

        for (position, (sort, value)) in self.ordering.iter().zip(&self.values).enumerate() {
            let Some(step) = strictly_after(sort, value) else {
                continue;
            };

            let mut clauses: Vec<Expr> = self.ordering[..position]
                .iter()
                .zip(&self.values[..position])
                .map(|(sort, value)| Filter::eq(sort.field.as_str(), value.clone()))
                .collect();
            clauses.push(step);

            branches.push(match clauses.len() {
                1 => clauses.remove(0),
                _ => Expr::And(clauses),
            });
        }

        match branches.len() {
            1 => branches.remove(0),
            _ => Expr::Or(branches),
        }
    }
}

fn strictly_after(sort: &Sort, value: &Bson) -> Option<Expr> {
    let field = sort.field.as_str();

    match (sort.direction, value) {
        (SortDirection::Asc, Bson::Null) => Some(Filter::ne(field, Bson::Null)),
        (SortDirection::Asc, value) => Some(Filter::gt(field, value.clone())),
        (SortDirection::Desc, Bson::Null) => None,
        (SortDirection::Desc, value) => Some(Filter::or([
            Filter::lt(field, value.clone()),
            Filter::eq(field, Bson::Null),
        ])),
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    ordering: Vec<Sort>,
    values: Vec<Bson>,
}

/// Encodes cursors and drives forward-only pagination.
#[derive(Debug, Clone)]
pub struct CursorPaginator {
    secret: Option<Vec<u8>>,
    max_page_size: usize,
}

impl Default for CursorPaginator {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl CursorPaginator {
    /// A paginator accepting page sizes up to `max_page_size`, issuing checksummed tokens.
    pub fn new(max_page_size: usize) -> Self {
        Self { secret: None, max_page_size }
    }

    /// Signs tokens with `secret` so they cannot be forged.
    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secret = Some(secret.as_ref().to_vec());
        self
    }

    /// Largest accepted page size.
    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// Encodes a key into an opaque token.
    pub fn encode(&self, key: &CursorKey) -> RepositoryResult<Cursor> {
        let envelope = Envelope {
            v: VERSION,
            ordering: key.ordering.clone(),
            values: key.values.clone(),
        };

        let mut bytes = bson::serialize_to_vec(&envelope)?;
        let tag = self.tag(&bytes);
        bytes.extend_from_slice(&tag);

        Ok(Cursor(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Decodes a token issued by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidCursor`] for malformed, truncated, tampered or unknown-version
    /// tokens.
    pub fn decode(&self, cursor: &Cursor) -> RepositoryResult<CursorKey> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.as_str())
            .map_err(|e| RepositoryError::InvalidCursor(format!("not base64: {e}")))?;

        let tag_len = self.tag_len();
        if bytes.len() <= tag_len {
            return Err(RepositoryError::InvalidCursor("token is truncated".into()));
        }

        let (payload, tag) = bytes.split_at(bytes.len() - tag_len);
        if self.tag(payload) != tag {
            return Err(RepositoryError::InvalidCursor("token failed verification".into()));
        }

        let envelope: Envelope = bson::deserialize_from_slice(payload)
            .map_err(|e| RepositoryError::InvalidCursor(format!("unreadable payload: {e}")))?;

        if envelope.v != VERSION {
            return Err(RepositoryError::InvalidCursor(format!(
                "unsupported token version {}",
                envelope.v
            )));
        }
        if envelope.ordering.is_empty() || envelope.ordering.len() != envelope.values.len() {
            return Err(RepositoryError::InvalidCursor("token key is inconsistent".into()));
        }

        Ok(CursorKey {
            ordering: envelope.ordering,
            values: envelope.values,
        })
    }

    /// Fetches one page of `spec` on `collection`, ordered by `matched.ordering`.
    ///
    /// Reads at most `page_size + 1` documents: the extra one only tells whether another page
    /// exists.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Validation`] if `page_size` is outside `1..=max_page_size`.
    /// - [`RepositoryError::InvalidCursor`] if `cursor` is invalid or belongs to another ordering.
    /// - [`RepositoryError::Timeout`] if `deadline` expires.
    #[allow(clippy::too_many_arguments)]
    pub async fn paginate<B: StoreBackend>(
        &self,
        backend: &B,
        collection: &str,
        spec: &QuerySpec,
        matched: &IndexMatch,
        cursor: Option<&Cursor>,
        page_size: usize,
        deadline: Deadline,
    ) -> RepositoryResult<Page<StoredDocument>> {
        if page_size == 0 || page_size > self.max_page_size {
            return Err(RepositoryError::Validation(format!(
                "page size {page_size} is outside 1..={}",
                self.max_page_size
            )));
        }

        let after = match cursor {
            Some(cursor) => {
                let key = self.decode(cursor)?;
                if key.ordering != matched.ordering {
                    return Err(RepositoryError::InvalidCursor(
                        "token was issued for a different ordering".into(),
                    ));
                }
                Some(key.after_filter())
            }
            None => None,
        };

        let filter = match (spec.to_filter(), after) {
            (Some(filter), Some(after)) => Some(filter.and(after)),
            (filter, after) => filter.or(after),
        };

        let query = Query {
            filter,
            limit: Some(page_size + 1),
            sort: matched.ordering.clone(),
        };

        let mut rows = deadline
            .run("page query", backend.query_documents(query, collection))
            .await?;

        let has_more = rows.len() > page_size;
        rows.truncate(page_size);

        let items = rows
            .into_iter()
            .map(|(id, body)| StoredDocument::from_row(id, body))
            .collect::<RepositoryResult<Vec<_>>>()?;

        let next_cursor = match (has_more, items.last()) {
            (true, Some(last)) => Some(self.encode(&CursorKey::from_document(
                &matched.ordering,
                &last.id,
                &last.body,
            ))?),
            _ => None,
        };

        log::debug!(
            "fetched {} document(s) from {collection} (more: {has_more})",
            items.len()
        );

        Ok(Page::builder(items)
            .with_next_cursor(next_cursor)
            .with_warnings(matched.warnings.clone())
            .build())
    }

    fn tag_len(&self) -> usize {
        match self.secret {
            Some(_) => SIGNATURE_LEN,
            None => CHECKSUM_LEN,
        }
    }

    fn tag(&self, payload: &[u8]) -> Vec<u8> {
        match &self.secret {
            Some(secret) => {
                let mut hasher = Sha256::new();
                hasher.update(secret);
                hasher.update(payload);
                hasher.finalize().to_vec()
            }
            None => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(payload);
                hasher.finalize().to_be_bytes().to_vec()
            }
        }
    }
}

/// The `_id` tie-breaker entry of an ordering.
pub fn id_sort(direction: SortDirection) -> Sort {
    Sort::new(ID_FIELD, direction)
}
