//! Shared pagination query parameters and response envelope.

use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

/// `?page=` (1-based) and `?limit=` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl Pagination {
    /// Effective page (>= 1) and limit (1..=100).
    pub fn clamp(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (page, limit)
    }

    /// SQL LIMIT/OFFSET values.
    pub fn limit_offset(&self) -> (i64, i64) {
        let (page, limit) = self.clamp();
        (i64::from(limit), i64::from(limit) * i64::from(page - 1))
    }
}

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let (page, limit) = pagination.clamp();
        Self {
            items,
            total,
            page,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let p = Pagination::default();
        assert_eq!(p.clamp(), (1, 20));
        assert_eq!(p.limit_offset(), (20, 0));
    }

    #[test]
    fn page_zero_and_oversized_limit_are_clamped() {
        let p = Pagination {
            page: Some(0),
            limit: Some(5000),
        };
        assert_eq!(p.clamp(), (1, 100));
    }

    #[test]
    fn offset_math() {
        let p = Pagination {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(p.limit_offset(), (10, 20));
    }
}
