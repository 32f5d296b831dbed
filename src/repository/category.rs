use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{RepositoryContext, record_item};
use crate::consistency::{FailurePolicy, Page, Pagination, UniqueConstraintIndex};
use crate::core::{DomainError, EntityKind, ItemKey, Result, TableSchema, Value, from_item};
use crate::storage::{Condition, WriteOp};

const CATEGORY_PARTITION: &str = "CATEGORY";

/// A course category. Titles are unique across all categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(category_id: i64, title: &str) -> Self {
        Self {
            category_id,
            title: title.to_string(),
            created_at: Utc::now(),
        }
    }
}

pub fn category_key(category_id: i64) -> ItemKey {
    ItemKey::new(CATEGORY_PARTITION, category_id)
}

pub struct CategoryRepository {
    ctx: RepositoryContext,
    titles: UniqueConstraintIndex,
}

impl CategoryRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        let titles = UniqueConstraintIndex::new(
            TableSchema::new(&ctx.tables.category, "id", "categoryId"),
            "CATEGORY_TITLE",
            "title",
        );
        Self { ctx, titles }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.category
    }

    pub async fn save_if_not_exists_or_throw(&self, category: &Category) -> Result<()> {
        let item = record_item(category, Some(("id", CATEGORY_PARTITION)))?;
        let ops = vec![
            WriteOp::put(self.table(), item, Condition::NotExists),
            self.titles.reserve(&category.title, category.category_id),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Category))
            .on(1, self.titles.violation(&category.title));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(category_id = category.category_id, title = %category.title, "category created");
        Ok(())
    }

    pub async fn find_by_id(&self, category_id: i64) -> Result<Option<Category>> {
        let item = self.ctx.get(self.table(), &category_key(category_id)).await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, category_id: i64) -> Result<Category> {
        self.find_by_id(category_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Category))
    }

    pub async fn find_by_title(&self, title: &str) -> Result<Option<Category>> {
        match self.titles.owner_of(&self.ctx.store, title).await? {
            Some(category_id) => self.find_by_id(category_id).await,
            None => Ok(None),
        }
    }

    pub async fn find_many(&self, pagination: &Pagination) -> Result<Page<Category>> {
        self.ctx
            .walker
            .walk(self.table(), CATEGORY_PARTITION, pagination)
            .await?
            .into_records()
    }

    /// Moves the category to a new title, releasing the old one.
    pub async fn rename(&self, category_id: i64, title: &str) -> Result<()> {
        self.ctx
            .retry
            .run("category.rename", move || self.try_rename(category_id, title))
            .await
    }

    async fn try_rename(&self, category_id: i64, title: &str) -> Result<()> {
        let current = self.find_by_id_or_throw(category_id).await?;
        if current.title == title {
            return Ok(());
        }
        let ops = self
            .titles
            .rename(category_key(category_id), category_id, &current.title, title);
        self.ctx
            .coordinator
            .submit(ops, &self.titles.rename_policy(title))
            .await?;
        debug!(category_id, from = %current.title, to = %title, "category renamed");
        Ok(())
    }

    /// Deletes the category and frees its title. Absence is success.
    pub async fn delete_if_exists_or_throw(&self, category_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("category.delete", move || self.try_delete(category_id))
            .await
    }

    async fn try_delete(&self, category_id: i64) -> Result<()> {
        let Some(current) = self.find_by_id(category_id).await? else {
            debug!(category_id, "category already absent");
            return Ok(());
        };
        let ops = vec![
            WriteOp::delete(
                self.table(),
                category_key(category_id),
                Condition::exists_with(vec![(self.titles.field(), Value::from(current.title.as_str()))]),
            ),
            self.titles.release(&current.title),
        ];
        self.ctx.coordinator.submit(ops, &FailurePolicy::new()).await?;
        Ok(())
    }
}
