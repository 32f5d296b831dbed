use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::course::{NUMBER_OF_ATTACHMENTS, course_key};
use super::lesson::lesson_key;
use super::{RepositoryContext, patch_actions, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterDelta, FailurePolicy, FailureResolution, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, ItemKey, Result, from_item};
use crate::storage::{Condition, WriteOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub lesson_id: i64,
    pub attachment_id: i64,
    pub course_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(course_id: i64, lesson_id: i64, attachment_id: i64, title: &str) -> Self {
        Self {
            lesson_id,
            attachment_id,
            course_id,
            title: title.to_string(),
            url: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPatch {
    #[serde(skip)]
    pub lesson_id: i64,
    #[serde(skip)]
    pub attachment_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub fn attachment_key(lesson_id: i64, attachment_id: i64) -> ItemKey {
    ItemKey::new(lesson_id, attachment_id)
}

pub struct AttachmentRepository {
    ctx: RepositoryContext,
}

impl AttachmentRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.attachment
    }

    /// `ADD delta` to the attachment count of the lesson and the course.
    fn counter_writes(&self, course_id: i64, lesson_id: i64, delta: i64) -> [WriteOp; 2] {
        let deltas = [CounterDelta::new(NUMBER_OF_ATTACHMENTS, delta)];
        [
            AggregateCounterMaintainer::increment(
                &self.ctx.tables.lesson,
                lesson_key(course_id, lesson_id),
                &deltas,
            ),
            AggregateCounterMaintainer::increment(&self.ctx.tables.course, course_key(course_id), &deltas),
        ]
    }

    pub async fn save_if_not_exists_or_throw(&self, attachment: &Attachment) -> Result<()> {
        let item = record_item(attachment, None)?;
        let mut ops = vec![WriteOp::put(self.table(), item, Condition::NotExists)];
        ops.extend(self.counter_writes(attachment.course_id, attachment.lesson_id, 1));

        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Attachment))
            .on(1, DomainError::NotFound(EntityKind::Lesson))
            .on(2, DomainError::NotFound(EntityKind::Course));
        self.ctx.coordinator.submit(ops, &policy).await?;
        Ok(())
    }

    pub async fn find_by_id(&self, lesson_id: i64, attachment_id: i64) -> Result<Option<Attachment>> {
        let item = self
            .ctx
            .get(self.table(), &attachment_key(lesson_id, attachment_id))
            .await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, lesson_id: i64, attachment_id: i64) -> Result<Attachment> {
        self.find_by_id(lesson_id, attachment_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Attachment))
    }

    pub async fn find_many(&self, lesson_id: i64, pagination: &Pagination) -> Result<Page<Attachment>> {
        self.ctx
            .walker
            .walk(self.table(), lesson_id, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &AttachmentPatch) -> Result<()> {
        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(
                    self.table(),
                    attachment_key(patch.lesson_id, patch.attachment_id),
                    actions,
                    Condition::Exists,
                ),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Attachment)),
            )
            .await?;
        Ok(())
    }

    /// Idempotent: an absent attachment is success. An absent course still
    /// leaves the lesson's count maintained; an absent lesson leaves the
    /// attachment to be deleted on its own.
    pub async fn delete_if_exists_or_throw(
        &self,
        course_id: i64,
        lesson_id: i64,
        attachment_id: i64,
    ) -> Result<()> {
        let key = attachment_key(lesson_id, attachment_id);
        let mut ops = vec![WriteOp::delete(self.table(), key.clone(), Condition::Exists)];
        ops.extend(self.counter_writes(course_id, lesson_id, -1));

        let policy = FailurePolicy::new()
            .absorb(0)
            .on(1, DomainError::NotFound(EntityKind::Lesson))
            .on(2, DomainError::NotFound(EntityKind::Course));

        let lesson_gone = match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(outcome) => {
                if !outcome.applied() {
                    debug!(lesson_id, attachment_id, "attachment already absent");
                }
                return Ok(());
            }
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(lesson_id, attachment_id, "course absent, updating lesson count only");
                let [lesson_write, _] = self.counter_writes(course_id, lesson_id, -1);
                let ops = vec![
                    WriteOp::delete(self.table(), key.clone(), Condition::Exists),
                    lesson_write,
                ];
                let policy = FailurePolicy::new()
                    .absorb(0)
                    .on(1, DomainError::NotFound(EntityKind::Lesson));
                match self.ctx.coordinator.submit(ops, &policy).await {
                    Ok(_) => return Ok(()),
                    Err(err) if err.is_not_found() => err,
                    Err(err) => return Err(err),
                }
            }
            Err(err) if err.is_not_found() => err,
            Err(err) => return Err(err),
        };

        debug!(lesson_id, attachment_id, error = %lesson_gone, "lesson absent, deleting attachment alone");
        self.ctx
            .coordinator
            .write(
                WriteOp::delete(self.table(), key, Condition::Exists),
                FailureResolution::Absorb,
            )
            .await?;
        Ok(())
    }
}
