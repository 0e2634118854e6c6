use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Shared error types for repository operations across all domains.
/// These errors represent infrastructure concerns rather than
/// domain-specific business logic.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("'{0}' does not exist")]
    NotFound(String),
    #[error("Cannot add this resource as it already exists: {0}")]
    AlreadyExists(String),
    #[error("Data validation failed: {0}")]
    ValidationFailed(String),
    #[error("Only {written} rows were written before the batch failed: {message}")]
    PartialWrite { written: usize, message: String },
    #[error("Database operation error: {0}")]
    DatabaseError(#[source] anyhow::Error),
}

/// Unexpected failure tagged with a stable machine-readable code.
///
/// Each call site owns its own code so operators can locate the failing
/// path from a client-visible error alone.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct InternalFailure {
    pub code: &'static str,
    pub message: String,
}

impl InternalFailure {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Builds a `map_err` adapter that wraps any displayable error into an
/// [`InternalFailure`] carrying `code`.
pub fn internal<E: fmt::Display>(
    code: &'static str,
    context: &'static str,
) -> impl FnOnce(E) -> InternalFailure {
    move |e| InternalFailure::new(code, format!("{context}: {e}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("order must be 'asc' or 'desc', got '{other}'")),
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Cursor pagination over `(created_at, id)` ordering.
///
/// `after`/`before` are internal row IDs; callers resolve public-ID cursors
/// first. Rows are taken strictly after (or before) the cursor row in the
/// requested order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub order: SortOrder,
    pub after: Option<i64>,
    pub before: Option<i64>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            order: SortOrder::Asc,
            after: None,
            before: None,
        }
    }
}

impl Pagination {
    pub fn new(limit: i64, order: SortOrder) -> Self {
        Self {
            limit,
            order,
            ..Default::default()
        }
    }

    /// Clamps `limit` into `1..=MAX_PAGE_LIMIT`.
    pub fn validated(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }
}

/// At most `limit` rows plus whether more rows follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
        }
    }
}

/// Current time as unix seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
