use crate::filter::{value_cmp, Filter};
use crate::query::{QueryParameters, QueryResult, SortOrder};
use crate::store::{DocumentStore, QueryError, StoreError};
use chrono::{DateTime, Utc};
use models::Document;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// In-process `DocumentStore`. Single-document atomicity comes from the
/// store-wide write lock; TTL fields registered via `ensure_ttl` are reaped
/// lazily whenever their collection is touched, expiring documents at the
/// stored timestamp.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    ttl_fields: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl Inner {
    fn reap_expired(&mut self, collection: &str) {
        let Some(field) = self.ttl_fields.get(collection).cloned() else {
            return;
        };
        let Some(docs) = self.collections.get_mut(collection) else {
            return;
        };
        let now = Utc::now();
        docs.retain(|_, doc| match doc.get(&field) {
            Some(Value::String(raw)) => match raw.parse::<DateTime<Utc>>() {
                Ok(expires) => expires > now,
                Err(_) => true,
            },
            _ => true,
        });
    }

    fn docs_mut(&mut self, collection: &str) -> &mut BTreeMap<String, Document> {
        self.collections.entry(collection.to_string()).or_default()
    }
}

fn project(doc: &Document, select: &[String]) -> Document {
    if select.is_empty() {
        return doc.clone();
    }
    select
        .iter()
        .filter_map(|field| doc.get(field).map(|v| (field.clone(), v.clone())))
        .collect()
}

fn sort_documents(docs: &mut [Document], sort: &[crate::query::SortKey]) {
    docs.sort_by(|a, b| {
        for key in sort {
            let ord = match (a.get(&key.field), b.get(&key.field)) {
                (Some(x), Some(y)) => value_cmp(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ord = match key.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn eval(filter: &Filter, doc: &Document) -> Result<bool, StoreError> {
    filter
        .matches(doc)
        .map_err(|err| StoreError::Permanent(err.to_string()))
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, params: &QueryParameters) -> Result<QueryResult, QueryError> {
        if params.top == 0 && !params.include_count {
            return Err(QueryError::BadRange(
                "top must be positive unless the query is a count-only probe".to_string(),
            ));
        }

        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(&params.collection);

        let mut matched: Vec<Document> = Vec::new();
        if let Some(docs) = inner.collections.get(&params.collection) {
            for doc in docs.values() {
                if params.filter.matches(doc)? {
                    matched.push(doc.clone());
                }
            }
        }
        let total = matched.len() as u64;
        sort_documents(&mut matched, &params.sort);

        let data: Vec<Document> = matched
            .into_iter()
            .skip(params.skip)
            .take(params.top)
            .map(|doc| project(&doc, &params.select_fields))
            .collect();

        Ok(QueryResult {
            collection: params.collection.clone(),
            count: data.len(),
            data,
            total_count: params.include_count.then_some(total),
            skip: params.skip,
            top: params.top,
            executed_at: Utc::now(),
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn insert(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        if !self.insert_if_absent(collection, id, doc).await? {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        inner.docs_mut(collection).insert(id.to_string(), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, doc: Document) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        let docs = inner.docs_mut(collection);
        match docs.get_mut(id) {
            Some(existing) => {
                *existing = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        let docs = inner.docs_mut(collection);
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), doc);
        Ok(true)
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        let docs = inner.docs_mut(collection);
        match docs.get(id) {
            Some(existing) if eval(expected, existing)? => {
                docs.insert(id.to_string(), doc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        Ok(inner.docs_mut(collection).remove(id).is_some())
    }

    async fn delete_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        let docs = inner.docs_mut(collection);
        match docs.get(id) {
            Some(existing) if eval(expected, existing)? => {
                docs.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.reap_expired(collection);
        let mut count = 0;
        if let Some(docs) = inner.collections.get(collection) {
            for doc in docs.values() {
                if eval(filter, doc)? {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn ensure_ttl(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner
            .ttl_fields
            .insert(collection.to_string(), field.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::SortKey;
    use chrono::Duration;
    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn insert_conflicts_on_existing_id() {
        let store = MemoryStore::new();
        store.insert("c", "1", doc(&[("a", json!(1))])).await.unwrap();
        let err = store.insert("c", "1", doc(&[])).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn query_filters_sorts_pages_and_counts() {
        let store = MemoryStore::new();
        for (id, n) in [("a", 3), ("b", 1), ("c", 2), ("d", 9)] {
            store
                .upsert("nums", id, doc(&[("n", json!(n)), ("keep", json!(n < 5))]))
                .await
                .unwrap();
        }

        let params = QueryParameters::new("nums")
            .with_filter(Filter::eq("keep", true))
            .with_sort(vec![SortKey::asc("n")])
            .paged(1, 1)
            .with_count();
        let result = store.query(&params).await.unwrap();
        assert_eq!(result.total_count, Some(3));
        assert_eq!(result.count, 1);
        assert_eq!(result.data[0].get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn count_only_probe_returns_no_rows() {
        let store = MemoryStore::new();
        store.upsert("c", "1", doc(&[("a", json!(1))])).await.unwrap();

        let result = store
            .query(&QueryParameters::count_only("c", Filter::Empty))
            .await
            .unwrap();
        assert_eq!(result.total_count, Some(1));
        assert!(result.data.is_empty());

        let err = store
            .query(&QueryParameters::new("c").paged(0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::BadRange(_)));
    }

    #[tokio::test]
    async fn select_projects_fields() {
        let store = MemoryStore::new();
        store
            .upsert("c", "1", doc(&[("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();
        let result = store
            .query(&QueryParameters::new("c").with_select(["a"]))
            .await
            .unwrap();
        assert_eq!(result.data[0], doc(&[("a", json!(1))]));
    }

    #[tokio::test]
    async fn conditional_replace_and_delete() {
        let store = MemoryStore::new();
        store
            .upsert("locks", "L", doc(&[("owner", json!("me"))]))
            .await
            .unwrap();

        let swapped = store
            .replace_if("locks", "L", &Filter::eq("owner", "you"), doc(&[]))
            .await
            .unwrap();
        assert!(!swapped);

        let swapped = store
            .replace_if(
                "locks",
                "L",
                &Filter::eq("owner", "me"),
                doc(&[("owner", json!("me2"))]),
            )
            .await
            .unwrap();
        assert!(swapped);

        assert!(!store
            .delete_if("locks", "L", &Filter::eq("owner", "me"))
            .await
            .unwrap());
        assert!(store
            .delete_if("locks", "L", &Filter::eq("owner", "me2"))
            .await
            .unwrap());
        assert!(!store.delete("locks", "L").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_reaps_expired_documents() {
        let store = MemoryStore::new();
        store.ensure_ttl("locks", "expires_at").await.unwrap();

        let past = (Utc::now() - Duration::seconds(5)).to_rfc3339();
        let future = (Utc::now() + Duration::seconds(60)).to_rfc3339();
        store
            .upsert("locks", "stale", doc(&[("expires_at", json!(past))]))
            .await
            .unwrap();
        store
            .upsert("locks", "live", doc(&[("expires_at", json!(future))]))
            .await
            .unwrap();

        assert!(store.get("locks", "stale").await.unwrap().is_none());
        assert!(store.get("locks", "live").await.unwrap().is_some());
    }
}
