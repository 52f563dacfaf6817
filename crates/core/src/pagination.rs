//! Pagination rules for listing entities.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

pub const DEFAULT_LIST_LIMIT: u32 = 20;
pub const MAX_LIST_LIMIT: u32 = 100;

/// A validated page request. `limit` is already capped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
}

/// Defaults and upper bound applied when resolving client-supplied paging.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PaginationPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIST_LIMIT,
            max_limit: MAX_LIST_LIMIT,
        }
    }
}

impl PaginationPolicy {
    pub fn new(default_limit: u32, max_limit: u32) -> DomainResult<Self> {
        if max_limit == 0 {
            return Err(DomainError::validation("max limit must be positive"));
        }
        Ok(Self {
            default_limit: default_limit.min(max_limit),
            max_limit,
        })
    }

    /// Resolve raw values into a [`Pagination`].
    ///
    /// Negative values are rejected; a missing limit takes the default; a limit
    /// above the maximum is capped rather than rejected.
    pub fn resolve(&self, limit: Option<i64>, offset: Option<i64>) -> DomainResult<Pagination> {
        let limit = match limit {
            None => self.default_limit,
            Some(l) if l < 0 => return Err(DomainError::validation("limit must be non-negative")),
            Some(l) => u32::try_from(l).unwrap_or(u32::MAX).min(self.max_limit),
        };

        let offset = match offset {
            None => 0,
            Some(o) if o < 0 => {
                return Err(DomainError::validation("offset must be non-negative"));
            }
            Some(o) => o as u64,
        };

        Ok(Pagination { limit, offset })
    }

    /// Same as [`resolve`](Self::resolve), from unparsed query-string values.
    pub fn parse(&self, limit: Option<&str>, offset: Option<&str>) -> DomainResult<Pagination> {
        let limit = parse_integer("limit", limit)?;
        let offset = parse_integer("offset", offset)?;
        self.resolve(limit, offset)
    }
}

fn parse_integer(name: &str, raw: Option<&str>) -> DomainResult<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DomainError::validation(format!("{name} must be an integer"))),
    }
}
