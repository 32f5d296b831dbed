use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CourseLookup, RepositoryContext, patch_actions, record_item};
use crate::consistency::{FailurePolicy, FailureResolution, Page, Pagination};
use crate::core::{DomainError, EntityKind, Item, ItemKey, Result, Value, from_item};
use crate::storage::{Condition, UpdateAction, WriteOp};

pub(crate) const COURSE_PARTITION: &str = "COURSE";
const CATEGORY_LINK_SCOPE: &str = "CATEGORY_LINK";
const CATEGORIES: &str = "categories";

pub const NUMBER_OF_LESSONS: &str = "numberOfLessons";
pub const NUMBER_OF_STUDENTS: &str = "numberOfStudents";
pub const NUMBER_OF_VIDEOS: &str = "numberOfVideos";
pub const NUMBER_OF_ATTACHMENTS: &str = "numberOfAttachments";
pub const NUMBER_OF_DURATIONS: &str = "numberOfDurations";
pub const NUMBER_OF_ASSIGNMENTS: &str = "numberOfAssignments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub number_of_lessons: i64,
    #[serde(default)]
    pub number_of_students: i64,
    #[serde(default)]
    pub number_of_videos: i64,
    #[serde(default)]
    pub number_of_attachments: i64,
    /// Sum of video durations in seconds.
    #[serde(default)]
    pub number_of_durations: i64,
    #[serde(default)]
    pub number_of_assignments: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub categories: BTreeSet<i64>,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn new(course_id: i64, title: &str) -> Self {
        Self {
            course_id,
            title: title.to_string(),
            description: None,
            price: 0,
            number_of_lessons: 0,
            number_of_students: 0,
            number_of_videos: 0,
            number_of_attachments: 0,
            number_of_durations: 0,
            number_of_assignments: 0,
            categories: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    #[serde(skip)]
    pub course_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
}

pub fn course_key(course_id: i64) -> ItemKey {
    ItemKey::new(COURSE_PARTITION, course_id)
}

fn category_link_key(category_id: i64, course_id: i64) -> ItemKey {
    ItemKey::new(format!("{}#{}", CATEGORY_LINK_SCOPE, category_id), course_id)
}

pub struct CourseRepository {
    ctx: RepositoryContext,
}

impl CourseRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.course
    }

    pub async fn save_if_not_exists_or_throw(&self, course: &Course) -> Result<()> {
        let item = record_item(course, Some(("id", COURSE_PARTITION)))?;
        self.ctx
            .coordinator
            .write(
                WriteOp::put(self.table(), item, Condition::NotExists),
                FailureResolution::Fail(DomainError::DuplicateKey(EntityKind::Course)),
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, course_id: i64) -> Result<Option<Course>> {
        let item = self.ctx.get(self.table(), &course_key(course_id)).await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, course_id: i64) -> Result<Course> {
        self.find_by_id(course_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Course))
    }

    pub async fn find_many(&self, pagination: &Pagination) -> Result<Page<Course>> {
        self.ctx
            .walker
            .walk(self.table(), COURSE_PARTITION, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &CoursePatch) -> Result<()> {
        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(self.table(), course_key(patch.course_id), actions, Condition::Exists),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Course)),
            )
            .await?;
        Ok(())
    }

    /// Removes the course record and its category links; other descendants
    /// are owned by their own repositories. An absent course is not an
    /// error.
    pub async fn delete_if_exists_or_throw(&self, course_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("course.delete", move || self.try_delete(course_id))
            .await
    }

    /// Guarded by the category set read here; a concurrent tag change
    /// retries the round.
    async fn try_delete(&self, course_id: i64) -> Result<()> {
        let Some(current) = self.find_by_id(course_id).await? else {
            debug!(course_id, "course already absent");
            return Ok(());
        };

        let guard = if current.categories.is_empty() {
            Condition::Exists.and(Condition::Missing(CATEGORIES.to_string()))
        } else {
            Condition::exists_with(vec![(CATEGORIES, Value::IntegerSet(current.categories.clone()))])
        };
        let mut ops = vec![WriteOp::delete(self.table(), course_key(course_id), guard)];
        ops.extend(current.categories.iter().map(|category_id| {
            WriteOp::delete(
                &self.ctx.tables.category,
                category_link_key(*category_id, course_id),
                Condition::Always,
            )
        }));

        self.ctx.coordinator.submit(ops, &FailurePolicy::new()).await?;
        debug!(course_id, links = current.categories.len(), "course deleted");
        Ok(())
    }

    /// Tags the course with a category. Idempotent: re-adding is a no-op.
    pub async fn add_category(&self, course_id: i64, category_id: i64) -> Result<()> {
        let mut marker = Item::new();
        marker.insert("id".to_string(), category_link_key(category_id, course_id).partition);
        marker.insert("categoryId".to_string(), Value::Integer(course_id));
        marker.insert("courseId".to_string(), Value::Integer(course_id));

        let ops = vec![
            WriteOp::update(
                self.table(),
                course_key(course_id),
                vec![UpdateAction::AddToSet(CATEGORIES.to_string(), category_id)],
                Condition::Exists,
            ),
            WriteOp::put(&self.ctx.tables.category, marker, Condition::Always),
        ];
        self.ctx
            .coordinator
            .submit(ops, &Self::membership_policy())
            .await?;
        Ok(())
    }

    /// Removes a category tag. Idempotent: removing an absent tag is a no-op.
    pub async fn remove_category(&self, course_id: i64, category_id: i64) -> Result<()> {
        let ops = vec![
            WriteOp::update(
                self.table(),
                course_key(course_id),
                vec![UpdateAction::RemoveFromSet(CATEGORIES.to_string(), category_id)],
                Condition::Exists,
            ),
            WriteOp::delete(
                &self.ctx.tables.category,
                category_link_key(category_id, course_id),
                Condition::Always,
            ),
        ];
        self.ctx
            .coordinator
            .submit(ops, &Self::membership_policy())
            .await?;
        Ok(())
    }

    /// Ids of courses tagged with `category_id`, newest id first.
    pub async fn find_course_ids_by_category(
        &self,
        category_id: i64,
        pagination: &Pagination,
    ) -> Result<Page<i64>> {
        let partition = category_link_key(category_id, 0).partition;
        let page = self
            .ctx
            .walker
            .walk(&self.ctx.tables.category, partition, pagination)
            .await?;
        let items = page
            .items
            .iter()
            .filter_map(|item| item.get("courseId").and_then(Value::as_integer))
            .collect();
        Ok(Page {
            items,
            cursor: page.cursor,
        })
    }

    fn membership_policy() -> FailurePolicy {
        FailurePolicy::new()
            .on(0, DomainError::NotFound(EntityKind::Course))
            .otherwise(DomainError::Internal("category link write rejected".to_string()))
    }
}

#[async_trait]
impl CourseLookup for CourseRepository {
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        self.find_by_id(course_id).await
    }
}
