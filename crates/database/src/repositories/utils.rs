use std::collections::BTreeMap;

use services::common::{Page, Pagination, RepositoryError, SortOrder};

/// Rows keyed by internal ID with a monotonically increasing sequence.
#[derive(Debug)]
pub(crate) struct Table<T> {
    pub(crate) rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T: Clone> Table<T> {
    pub(crate) fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn get(&self, id: i64) -> Option<T> {
        self.rows.get(&id).cloned()
    }

    pub(crate) fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.rows.values().find(|row| predicate(row)).cloned()
    }

    pub(crate) fn any(&self, predicate: impl Fn(&T) -> bool) -> bool {
        self.rows.values().any(predicate)
    }

    pub(crate) fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|row| predicate(row)).cloned().collect()
    }

    /// Replaces an existing row; `NotFound` when the ID is unknown.
    pub(crate) fn replace(&mut self, id: i64, row: T, kind: &str) -> Result<T, RepositoryError> {
        match self.rows.get_mut(&id) {
            Some(slot) => {
                *slot = row.clone();
                Ok(row)
            }
            None => Err(not_found(kind, id)),
        }
    }

    pub(crate) fn remove(&mut self, id: i64, kind: &str) -> Result<T, RepositoryError> {
        self.rows.remove(&id).ok_or_else(|| not_found(kind, id))
    }
}

pub(crate) fn not_found(kind: &str, id: i64) -> RepositoryError {
    RepositoryError::NotFound(format!("{kind} {id}"))
}

/// Applies the cursor contract over rows ordered by `(created_at, id)`.
///
/// `cursor` maps a cursor row ID to its sort key. Rows strictly after the
/// `after` row and strictly before the `before` row (in the requested order)
/// are eligible. With only `before`, the page holds the rows nearest the
/// cursor. `has_more` reports rows left beyond the page on the far side.
pub(crate) fn paginate<T>(
    rows: Vec<T>,
    pagination: Pagination,
    key: impl Fn(&T) -> (i64, i64),
    cursor: impl Fn(i64) -> Option<(i64, i64)>,
) -> Result<Page<T>, RepositoryError> {
    let limit = usize::try_from(pagination.limit.max(1)).unwrap_or(1);
    let order = pagination.order;
    let resolve = |id: i64| cursor(id).ok_or_else(|| not_found("cursor row", id));
    let after = pagination.after.map(&resolve).transpose()?;
    let before = pagination.before.map(&resolve).transpose()?;

    let precedes = |a: (i64, i64), b: (i64, i64)| match order {
        SortOrder::Asc => a < b,
        SortOrder::Desc => a > b,
    };

    let mut rows: Vec<T> = rows
        .into_iter()
        .filter(|row| {
            let k = key(row);
            after.is_none_or(|c| precedes(c, k)) && before.is_none_or(|c| precedes(k, c))
        })
        .collect();
    rows.sort_by_key(|row| key(row));
    if order == SortOrder::Desc {
        rows.reverse();
    }

    let has_more = rows.len() > limit;
    if after.is_none() && before.is_some() {
        let start = rows.len().saturating_sub(limit);
        return Ok(Page {
            items: rows.split_off(start),
            has_more,
        });
    }
    rows.truncate(limit);
    Ok(Page {
        items: rows,
        has_more,
    })
}
