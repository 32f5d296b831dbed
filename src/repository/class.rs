use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::course::{NUMBER_OF_ASSIGNMENTS, course_key};
use super::{RepositoryContext, patch_actions, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterDelta, FailurePolicy, FailureResolution, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, ItemKey, Result, Value, from_item};
use crate::storage::{Condition, WriteOp};

/// A class run of a course. Its assignments roll up into
/// `number_of_assignments` here and on the course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub course_id: i64,
    pub class_id: i64,
    pub title: String,
    #[serde(default)]
    pub number_of_assignments: i64,
    pub created_at: DateTime<Utc>,
}

impl Class {
    pub fn new(course_id: i64, class_id: i64, title: &str) -> Self {
        Self {
            course_id,
            class_id,
            title: title.to_string(),
            number_of_assignments: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPatch {
    #[serde(skip)]
    pub course_id: i64,
    #[serde(skip)]
    pub class_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn class_key(course_id: i64, class_id: i64) -> ItemKey {
    ItemKey::new(course_id, class_id)
}

pub struct ClassRepository {
    ctx: RepositoryContext,
}

impl ClassRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.class
    }

    pub async fn save_if_not_exists_or_throw(&self, class: &Class) -> Result<()> {
        let item = record_item(class, None)?;
        self.ctx
            .coordinator
            .write(
                WriteOp::put(self.table(), item, Condition::NotExists),
                FailureResolution::Fail(DomainError::DuplicateKey(EntityKind::Class)),
            )
            .await?;
        info!(course_id = class.course_id, class_id = class.class_id, "class created");
        Ok(())
    }

    pub async fn find_by_id(&self, course_id: i64, class_id: i64) -> Result<Option<Class>> {
        let item = self
            .ctx
            .get(self.table(), &class_key(course_id, class_id))
            .await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, course_id: i64, class_id: i64) -> Result<Class> {
        self.find_by_id(course_id, class_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Class))
    }

    pub async fn find_many(&self, course_id: i64, pagination: &Pagination) -> Result<Page<Class>> {
        self.ctx
            .walker
            .walk(self.table(), course_id, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &ClassPatch) -> Result<()> {
        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(
                    self.table(),
                    class_key(patch.course_id, patch.class_id),
                    actions,
                    Condition::Exists,
                ),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Class)),
            )
            .await?;
        Ok(())
    }

    /// Deletes the class and takes its assignments out of the course's
    /// count. Guarded by the class's own count, so a concurrent assignment
    /// write retries the round.
    pub async fn delete_if_exists_or_throw(&self, course_id: i64, class_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("class.delete", move || self.try_delete(course_id, class_id))
            .await
    }

    async fn try_delete(&self, course_id: i64, class_id: i64) -> Result<()> {
        let key = class_key(course_id, class_id);
        let Some(current) = self.ctx.get(self.table(), &key).await? else {
            debug!(course_id, class_id, "class already absent");
            return Ok(());
        };
        let assignments = AggregateCounterMaintainer::read(&current, NUMBER_OF_ASSIGNMENTS);

        let ops = vec![
            WriteOp::delete(
                self.table(),
                key.clone(),
                Condition::exists_with(vec![(NUMBER_OF_ASSIGNMENTS, Value::Integer(assignments))]),
            ),
            AggregateCounterMaintainer::decrement(
                &self.ctx.tables.course,
                course_key(course_id),
                &[CounterDelta::new(NUMBER_OF_ASSIGNMENTS, assignments)],
            ),
        ];
        let policy = FailurePolicy::new().on(1, DomainError::NotFound(EntityKind::Course));

        match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(_) => Ok(()),
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(course_id, class_id, "course absent, deleting class alone");
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
