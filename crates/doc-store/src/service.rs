use crate::odata::{parse_filter, parse_order_by, parse_select};
use crate::query::{QueryParameters, QueryResult};
use crate::store::{DocumentStore, QueryError};
use std::sync::Arc;

/// A query expressed as restricted OData-style strings, the form boundary
/// callers hand over. Every string is validated and translated into the
/// filter algebra before any I/O is issued.
#[derive(Clone, Debug, Default)]
pub struct ODataQuery {
    /// `$filter`-style expression; empty means match everything.
    pub filter: String,
    /// `$orderby`-style list, e.g. `CPH asc, UpdatedAtUtc desc`.
    pub order_by: String,
    /// `$select`-style field list; empty means all fields.
    pub select: String,
    pub skip: usize,
    pub top: usize,
    pub include_count: bool,
}

impl ODataQuery {
    pub fn all() -> ODataQuery {
        ODataQuery {
            top: usize::MAX,
            ..Default::default()
        }
    }

    pub fn filtered(filter: &str) -> ODataQuery {
        ODataQuery {
            filter: filter.to_string(),
            ..ODataQuery::all()
        }
    }
}

/// String-driven entry point over a `DocumentStore`.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn DocumentStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> QueryService {
        QueryService { store }
    }

    /// Translate and validate, then run one page.
    pub async fn query(
        &self,
        collection: &str,
        query: &ODataQuery,
    ) -> Result<QueryResult, QueryError> {
        let params = self.translate(collection, query)?;
        self.store.query(&params).await
    }

    /// Run a paged scan to exhaustion and concatenate the pages. The page
    /// size is `query.top`; `skip` advances by the rows actually returned.
    pub async fn query_all(
        &self,
        collection: &str,
        query: &ODataQuery,
    ) -> Result<QueryResult, QueryError> {
        let params = self.translate(collection, query)?;
        if params.top == 0 {
            // A count-only probe has nothing to page through.
            return self.store.query(&params).await;
        }

        let mut pages = Vec::new();
        let mut skip = params.skip;
        loop {
            let page = self
                .store
                .query(&QueryParameters {
                    skip,
                    ..params.clone()
                })
                .await?;
            let rows = page.count;
            pages.push(page);
            if rows < params.top {
                break;
            }
            skip += rows;
        }
        Ok(QueryResult::combine(pages).expect("at least one page was fetched"))
    }

    fn translate(
        &self,
        collection: &str,
        query: &ODataQuery,
    ) -> Result<QueryParameters, QueryError> {
        if query.top == 0 && !query.include_count {
            return Err(QueryError::BadRange(
                "top must be positive unless the query is a count-only probe".to_string(),
            ));
        }
        Ok(QueryParameters {
            collection: collection.to_string(),
            filter: parse_filter(&query.filter)?,
            sort: parse_order_by(&query.order_by)?,
            select_fields: parse_select(&query.select)?,
            skip: query.skip,
            top: query.top,
            include_count: query.include_count,
        })
    }
}
