use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::course::{
    NUMBER_OF_ATTACHMENTS, NUMBER_OF_DURATIONS, NUMBER_OF_LESSONS, NUMBER_OF_VIDEOS, course_key,
};
use super::{LessonLookup, RepositoryContext, patch_actions, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterDelta, FailurePolicy, FailureResolution, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, Item, ItemKey, Result, Value, from_item};
use crate::storage::{Condition, WriteOp};

pub const VIDEO_ARRANGEMENT_VERSION: &str = "videoArrangementVersion";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub course_id: i64,
    pub lesson_id: i64,
    pub title: String,
    #[serde(default)]
    pub number_of_videos: i64,
    #[serde(default)]
    pub number_of_attachments: i64,
    #[serde(default)]
    pub number_of_durations: i64,
    /// Bumped whenever the lesson's videos change order or membership.
    #[serde(default)]
    pub video_arrangement_version: i64,
    pub created_at: DateTime<Utc>,
}

impl Lesson {
    pub fn new(course_id: i64, lesson_id: i64, title: &str) -> Self {
        Self {
            course_id,
            lesson_id,
            title: title.to_string(),
            number_of_videos: 0,
            number_of_attachments: 0,
            number_of_durations: 0,
            video_arrangement_version: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPatch {
    #[serde(skip)]
    pub course_id: i64,
    #[serde(skip)]
    pub lesson_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn lesson_key(course_id: i64, lesson_id: i64) -> ItemKey {
    ItemKey::new(course_id, lesson_id)
}

pub struct LessonRepository {
    ctx: RepositoryContext,
}

impl LessonRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.lesson
    }

    /// Inserts the lesson and bumps the course's lesson count in one
    /// transaction.
    pub async fn save_if_not_exists_or_throw(&self, lesson: &Lesson) -> Result<()> {
        let item = record_item(lesson, None)?;
        let ops = vec![
            WriteOp::put(self.table(), item, Condition::NotExists),
            AggregateCounterMaintainer::increment(
                &self.ctx.tables.course,
                course_key(lesson.course_id),
                &[CounterDelta::new(NUMBER_OF_LESSONS, 1)],
            ),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Lesson))
            .on(1, DomainError::NotFound(EntityKind::Course));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(course_id = lesson.course_id, lesson_id = lesson.lesson_id, "lesson created");
        Ok(())
    }

    pub async fn find_by_id(&self, course_id: i64, lesson_id: i64) -> Result<Option<Lesson>> {
        let item = self
            .ctx
            .get(self.table(), &lesson_key(course_id, lesson_id))
            .await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, course_id: i64, lesson_id: i64) -> Result<Lesson> {
        self.find_by_id(course_id, lesson_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Lesson))
    }

    pub async fn find_many(&self, course_id: i64, pagination: &Pagination) -> Result<Page<Lesson>> {
        self.ctx
            .walker
            .walk(self.table(), course_id, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &LessonPatch) -> Result<()> {
        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(
                    self.table(),
                    lesson_key(patch.course_id, patch.lesson_id),
                    actions,
                    Condition::Exists,
                ),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Lesson)),
            )
            .await?;
        Ok(())
    }

    /// Deletes the lesson and takes it, with everything it rolls up, out of
    /// the course's counters.
    ///
    /// The roll-ups are read first, so the delete is guarded by them being
    /// unchanged and retried when a concurrent child write moved them.
    pub async fn delete_if_exists_or_throw(&self, course_id: i64, lesson_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("lesson.delete", move || self.try_delete(course_id, lesson_id))
            .await
    }

    async fn try_delete(&self, course_id: i64, lesson_id: i64) -> Result<()> {
        let key = lesson_key(course_id, lesson_id);
        let Some(current) = self.ctx.get(self.table(), &key).await? else {
            debug!(course_id, lesson_id, "lesson already absent");
            return Ok(());
        };

        let rollups = [
            CounterDelta::new(NUMBER_OF_LESSONS, 1),
            rollup(&current, NUMBER_OF_VIDEOS),
            rollup(&current, NUMBER_OF_ATTACHMENTS),
            rollup(&current, NUMBER_OF_DURATIONS),
        ];
        let guard = Condition::exists_with(
            rollups[1..]
                .iter()
                .map(|d| (d.field, Value::Integer(d.delta)))
                .collect(),
        );

        let ops = vec![
            WriteOp::delete(self.table(), key.clone(), guard),
            AggregateCounterMaintainer::decrement(
                &self.ctx.tables.course,
                course_key(course_id),
                &rollups,
            ),
        ];
        let policy = FailurePolicy::new().on(1, DomainError::NotFound(EntityKind::Course));

        match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(_) => Ok(()),
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(course_id, lesson_id, "course absent, deleting lesson alone");
                self.ctx
                    .coordinator
                    .write(
                        WriteOp::delete(self.table(), key, Condition::Exists),
                        FailureResolution::Absorb,
                    )
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// The lesson's own counter as a course-side delta.
fn rollup(lesson: &Item, field: &'static str) -> CounterDelta {
    CounterDelta::new(field, AggregateCounterMaintainer::read(lesson, field))
}

#[async_trait]
impl LessonLookup for LessonRepository {
    async fn find_lesson(&self, course_id: i64, lesson_id: i64) -> Result<Option<Lesson>> {
        self.find_by_id(course_id, lesson_id).await
    }
}
