use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::{DomainError, Item, Result, Value, from_item};
use crate::storage::{Cursor, KeyValueStore, QueryRequest};

/// Caller-side paging parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Maximum items to return; `None` walks the whole collection.
    pub limit: Option<usize>,
    /// Continuation from a previous page, passed back verbatim.
    pub cursor: Option<Cursor>,
    /// Only items whose sort key is strictly below this id.
    pub last_evaluated_id: Option<i64>,
}

impl Pagination {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn below(mut self, last_evaluated_id: i64) -> Self {
        self.last_evaluated_id = Some(last_evaluated_id);
        self
    }
}

/// One page of results plus the cursor to resume from, if more remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty(cursor: Option<Cursor>) -> Self {
        Self {
            items: Vec::new(),
            cursor,
        }
    }
}

impl Page<Item> {
    pub fn into_records<T: DeserializeOwned>(self) -> Result<Page<T>> {
        let items = self
            .items
            .iter()
            .map(|item| from_item(item).map_err(DomainError::from))
            .collect::<Result<Vec<T>>>()?;
        Ok(Page {
            items,
            cursor: self.cursor,
        })
    }
}

/// Accumulates store query pages until the requested limit is met or the
/// partition is exhausted.
#[derive(Clone)]
pub struct PaginationCursorWalker {
    store: Arc<dyn KeyValueStore>,
}

impl PaginationCursorWalker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn walk(
        &self,
        table: &str,
        partition: impl Into<Value>,
        pagination: &Pagination,
    ) -> Result<Page<Item>> {
        if pagination.limit == Some(0) {
            return Ok(Page::empty(pagination.cursor.clone()));
        }

        let partition = partition.into();
        let sort_before = pagination.last_evaluated_id.map(Value::Integer);
        let mut items: Vec<Item> = Vec::new();
        let mut cursor = pagination.cursor.clone();
        let mut queries = 0usize;

        loop {
            let remaining = pagination.limit.map(|limit| limit - items.len());
            let request = QueryRequest::new(table, partition.clone())
                .sort_before(sort_before.clone())
                .cursor(cursor.take())
                .limit(remaining);

            let output = self.store.query(request).await?;
            queries += 1;

            if remaining.is_some_and(|remaining| output.items.len() > remaining) {
                return Err(DomainError::Internal(format!(
                    "store returned {} items for a page of {:?}",
                    output.items.len(),
                    remaining
                )));
            }

            items.extend(output.items);
            cursor = output.cursor;

            let satisfied = pagination.limit.is_some_and(|limit| items.len() >= limit);
            if cursor.is_none() || satisfied {
                break;
            }
        }

        debug!(table, queries, returned = items.len(), more = cursor.is_some(), "paged query");
        Ok(Page { items, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TableSchema;
    use crate::storage::{Condition, InMemoryStore, InMemoryStoreConfig, WriteOp};

    async fn seeded(max_page_items: usize, count: i64) -> PaginationCursorWalker {
        let memory = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
            max_page_items,
            ..Default::default()
        }));
        memory
            .create_table(TableSchema::new("categories", "id", "categoryId"))
            .await;
        for id in 1..=count {
            let mut item = Item::new();
            item.insert("id".into(), Value::from("CATEGORY"));
            item.insert("categoryId".into(), Value::Integer(id));
            memory
                .write(WriteOp::put("categories", item, Condition::Always))
                .await
                .unwrap();
        }
        PaginationCursorWalker::new(memory)
    }

    fn ids(page: &Page<Item>) -> Vec<i64> {
        page.items
            .iter()
            .filter_map(|item| item.get("categoryId").and_then(Value::as_integer))
            .collect()
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let walker = seeded(100, 3).await;
        let page = walker
            .walk("categories", "CATEGORY", &Pagination::limit(0))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn accumulates_across_truncated_store_pages() {
        let walker = seeded(2, 7).await;
        let page = walker
            .walk("categories", "CATEGORY", &Pagination::limit(5))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![7, 6, 5, 4, 3]);
        assert!(page.cursor.is_some());

        let rest = walker
            .walk("categories", "CATEGORY", &Pagination::all().after(page.cursor))
            .await
            .unwrap();
        assert_eq!(ids(&rest), vec![2, 1]);
        assert!(rest.cursor.is_none());
    }

    #[tokio::test]
    async fn sort_key_bound() {
        let walker = seeded(100, 6).await;
        let page = walker
            .walk("categories", "CATEGORY", &Pagination::limit(2).below(4))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![3, 2]);
    }
}
