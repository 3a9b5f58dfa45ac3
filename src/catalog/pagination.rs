//! Offset/limit pagination shared by catalog listings and search results.

use sea_orm::QuerySelect;
use serde::{Deserialize, Serialize};

/// Largest `LIMIT`/`OFFSET` the database binds.
const SQL_WINDOW_MAX: u64 = i64::MAX.unsigned_abs();

/// Requested window of a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Number of items to skip
    #[serde(default)]
    pub offset: u64,
    /// Maximum number of items to return, `None` for all
    #[serde(default)]
    pub limit: Option<u64>,
}

impl Pagination {
    /// Window starting at `offset` with at most `limit` items.
    #[must_use]
    pub const fn new(offset: u64, limit: Option<u64>) -> Self {
        Self { offset, limit }
    }

    /// The first `limit` items.
    #[must_use]
    pub const fn first(limit: u64) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }

    /// Applies this window to a query.
    ///
    /// `SQLite` rejects `OFFSET` without `LIMIT`, so an open-ended window with an offset gets
    /// the largest limit instead.
    #[must_use]
    pub fn apply<Q: QuerySelect>(&self, query: Q) -> Q {
        let offset = self.offset.min(SQL_WINDOW_MAX);
        let limit = self.limit.map(|limit| limit.min(SQL_WINDOW_MAX));
        match (offset, limit) {
            (0, None) => query,
            (0, Some(limit)) => query.limit(limit),
            (offset, limit) => query.offset(offset).limit(limit.unwrap_or(SQL_WINDOW_MAX)),
        }
    }

    /// Cuts an in-memory, already ordered result down to this window.
    #[must_use]
    pub fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => iter.collect(),
        }
    }
}

/// One page of results plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResult<T> {
    /// Matching items before pagination
    pub total_count: u64,
    /// Items on this page
    pub count: u64,
    /// Offset the page starts at
    pub offset: u64,
    /// The page itself
    pub items: Vec<T>,
}

impl<T> PaginatedResult<T> {
    /// Wraps a page, deriving `count` from its length.
    #[must_use]
    pub fn new(items: Vec<T>, total_count: u64, pagination: Pagination) -> Self {
        Self {
            total_count,
            count: items.len() as u64,
            offset: pagination.offset,
            items,
        }
    }
}
