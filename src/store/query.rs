//! Collection queries: equality filters, ordering and pagination.

use serde_json::Value;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filters: Vec<(String, Value)>,
    order_by: Vec<(String, bool)>,
    limit: usize,
    offset: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Keep records whose `key` field equals `value`.
    pub fn filter(
        mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push((key.to_string(), value.into()));
        self
    }

    /// Order by `key`; `rev` sorts descending.
    pub fn order(
        mut self,
        key: &str,
        rev: bool,
    ) -> Self {
        self.order_by.push((key.to_string(), rev));
        self
    }

    /// A limit of zero is treated as one.
    pub fn set_limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn set_offset(
        mut self,
        offset: usize,
    ) -> Self {
        self.offset = offset;
        self
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn order_by(&self) -> &[(String, bool)] {
        &self.order_by
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}
