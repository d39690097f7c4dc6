use crate::filter::Filter;
use chrono::{DateTime, Utc};
use models::Document;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: &str) -> SortKey {
        SortKey {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: &str) -> SortKey {
        SortKey {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }
}

/// One page of a query. `top == 0` with `include_count` is a count-only
/// probe; `top == 0` without it is rejected as a bad range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryParameters {
    pub collection: String,
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    /// Empty means all fields.
    pub select_fields: Vec<String>,
    pub skip: usize,
    pub top: usize,
    pub include_count: bool,
}

impl QueryParameters {
    pub fn new(collection: &str) -> QueryParameters {
        QueryParameters {
            collection: collection.to_string(),
            filter: Filter::Empty,
            sort: Vec::new(),
            select_fields: Vec::new(),
            skip: 0,
            top: usize::MAX,
            include_count: false,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_select(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.select_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn paged(mut self, skip: usize, top: usize) -> Self {
        self.skip = skip;
        self.top = top;
        self
    }

    pub fn with_count(mut self) -> Self {
        self.include_count = true;
        self
    }

    /// A `top=0, include_count` probe that returns no rows.
    pub fn count_only(collection: &str, filter: Filter) -> QueryParameters {
        QueryParameters::new(collection)
            .with_filter(filter)
            .paged(0, 0)
            .with_count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResult {
    pub collection: String,
    pub data: Vec<Document>,
    /// Rows in this page; always `data.len()`.
    pub count: usize,
    /// Total matches irrespective of paging, when `include_count` was set.
    pub total_count: Option<u64>,
    pub skip: usize,
    pub top: usize,
    pub executed_at: DateTime<Utc>,
}

impl QueryResult {
    /// Concatenate result pages: `data` in order, `total_count` summed when
    /// every part carries one, first `collection` preserved, `executed_at`
    /// refreshed to now.
    pub fn combine(parts: impl IntoIterator<Item = QueryResult>) -> Option<QueryResult> {
        let mut parts = parts.into_iter();
        let mut combined = parts.next()?;

        for part in parts {
            combined.data.extend(part.data);
            combined.total_count = match (combined.total_count, part.total_count) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            };
            combined.top = combined.top.saturating_add(part.top);
        }
        combined.count = combined.data.len();
        combined.executed_at = Utc::now();
        Some(combined)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn result(collection: &str, ids: &[u64], total: Option<u64>) -> QueryResult {
        let data: Vec<Document> = ids
            .iter()
            .map(|id| [("id".to_string(), json!(id))].into_iter().collect())
            .collect();
        QueryResult {
            collection: collection.to_string(),
            count: data.len(),
            data,
            total_count: total,
            skip: 0,
            top: ids.len(),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn combine_concatenates_data_and_sums_totals() {
        let combined = QueryResult::combine([
            result("a", &[1, 2], Some(10)),
            result("b", &[3], Some(5)),
        ])
        .unwrap();
        assert_eq!(combined.collection, "a");
        assert_eq!(combined.count, 3);
        assert_eq!(combined.data.len(), 3);
        assert_eq!(combined.total_count, Some(15));
    }

    #[test]
    fn combine_of_one_is_identity_except_executed_at() {
        let single = result("a", &[1, 2], Some(2));
        let combined = QueryResult::combine([single.clone()]).unwrap();
        assert_eq!(combined.collection, single.collection);
        assert_eq!(combined.data, single.data);
        assert_eq!(combined.count, single.count);
        assert_eq!(combined.total_count, single.total_count);
    }

    #[test]
    fn combine_drops_total_when_any_part_is_missing_one() {
        let combined = QueryResult::combine([
            result("a", &[1], Some(1)),
            result("a", &[2], None),
        ])
        .unwrap();
        assert_eq!(combined.total_count, None);
    }

    #[test]
    fn combine_of_nothing_is_none() {
        assert!(QueryResult::combine([]).is_none());
    }
}
