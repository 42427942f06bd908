//! Result pages returned by cursor pagination.
//!
//! A [`Page`] carries the items of one page, the opaque [`Cursor`] resuming after its last item
//! (absent on the final page) and any [`IndexWarning`]s raised while planning the query. Pages
//! never carry a total count.

use serde::{Deserialize, Serialize};

use crate::{cursor::Cursor, error::RepositoryResult, index::IndexWarning};

/// A single page of results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use docguard::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_next_cursor(None)
///     .build();
///
/// assert!(page.is_last());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Resumes after the last item; `None` on the final page.
    pub next_cursor: Option<Cursor>,
    /// Warnings about how the query was served.
    #[serde(skip)]
    pub warnings: Vec<IndexWarning>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Whether no further page follows.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts the items, keeping cursor and warnings.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            warnings: self.warnings,
        }
    }

    /// Converts the items with a fallible function, stopping at the first failure.
    pub fn try_map<U>(self, f: impl FnMut(T) -> RepositoryResult<U>) -> RepositoryResult<Page<U>> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<RepositoryResult<_>>()?,
            next_cursor: self.next_cursor,
            warnings: self.warnings,
        })
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            warnings: Vec::new(),
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    items: Vec<T>,
    next_cursor: Option<Cursor>,
    warnings: Vec<IndexWarning>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            warnings: Vec::new(),
        }
    }

    /// Sets the cursor resuming after this page.
    pub fn with_next_cursor(mut self, next_cursor: Option<Cursor>) -> Self {
        self.next_cursor = next_cursor;
        self
    }

    /// Sets the planning warnings.
    pub fn with_warnings(mut self, warnings: Vec<IndexWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Builds and returns the final page.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            next_cursor: self.next_cursor,
            warnings: self.warnings,
        }
    }
}
