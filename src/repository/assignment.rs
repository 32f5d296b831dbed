use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::class::class_key;
use super::course::{NUMBER_OF_ASSIGNMENTS, course_key};
use super::{RepositoryContext, patch_actions, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterDelta, FailurePolicy, FailureResolution, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, ItemKey, Result, from_item};
use crate::storage::{Condition, WriteOp};

/// An assignment handed out to a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub class_id: i64,
    pub assignment_id: i64,
    pub course_id: i64,
    pub title: String,
    /// What the student hands in.
    pub submission: String,
    #[serde(default)]
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        course_id: i64,
        class_id: i64,
        assignment_id: i64,
        title: &str,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            class_id,
            assignment_id,
            course_id,
            title: title.to_string(),
            submission: String::new(),
            description: String::new(),
            deadline,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPatch {
    #[serde(skip)]
    pub class_id: i64,
    #[serde(skip)]
    pub assignment_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

pub fn assignment_key(class_id: i64, assignment_id: i64) -> ItemKey {
    ItemKey::new(class_id, assignment_id)
}

pub struct AssignmentRepository {
    ctx: RepositoryContext,
}

impl AssignmentRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.assignment
    }

    fn class_count(&self, course_id: i64, class_id: i64, delta: i64) -> WriteOp {
        AggregateCounterMaintainer::increment(
            &self.ctx.tables.class,
            class_key(course_id, class_id),
            &[CounterDelta::new(NUMBER_OF_ASSIGNMENTS, delta)],
        )
    }

    fn course_count(&self, course_id: i64, delta: i64) -> WriteOp {
        AggregateCounterMaintainer::increment(
            &self.ctx.tables.course,
            course_key(course_id),
            &[CounterDelta::new(NUMBER_OF_ASSIGNMENTS, delta)],
        )
    }

    /// Inserts the assignment and counts it on the class and the course.
    pub async fn save_if_not_exists_or_throw(&self, assignment: &Assignment) -> Result<()> {
        let item = record_item(assignment, None)?;
        let ops = vec![
            WriteOp::put(self.table(), item, Condition::NotExists),
            self.class_count(assignment.course_id, assignment.class_id, 1),
            self.course_count(assignment.course_id, 1),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Assignment))
            .on(1, DomainError::NotFound(EntityKind::Class))
            .on(2, DomainError::NotFound(EntityKind::Course));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(
            class_id = assignment.class_id,
            assignment_id = assignment.assignment_id,
            "assignment created"
        );
        Ok(())
    }

    pub async fn find_by_id(&self, class_id: i64, assignment_id: i64) -> Result<Option<Assignment>> {
        let item = self
            .ctx
            .get(self.table(), &assignment_key(class_id, assignment_id))
            .await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, class_id: i64, assignment_id: i64) -> Result<Assignment> {
        self.find_by_id(class_id, assignment_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Assignment))
    }

    /// Assignments of a class, newest id first.
    pub async fn find_many(&self, class_id: i64, pagination: &Pagination) -> Result<Page<Assignment>> {
        self.ctx
            .walker
            .walk(self.table(), class_id, pagination)
            .await?
            .into_records()
    }

    pub async fn save_if_exists_or_throw(&self, patch: &AssignmentPatch) -> Result<()> {
        let actions = patch_actions(patch, &[])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(
                    self.table(),
                    assignment_key(patch.class_id, patch.assignment_id),
                    actions,
                    Condition::Exists,
                ),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::Assignment)),
            )
            .await?;
        Ok(())
    }

    /// Idempotent. An absent course still leaves the class's count
    /// maintained; an absent class leaves the assignment to be deleted on
    /// its own.
    pub async fn delete_if_exists_or_throw(
        &self,
        course_id: i64,
        class_id: i64,
        assignment_id: i64,
    ) -> Result<()> {
        let key = assignment_key(class_id, assignment_id);
        let ops = vec![
            WriteOp::delete(self.table(), key.clone(), Condition::Exists),
            self.class_count(course_id, class_id, -1),
            self.course_count(course_id, -1),
        ];
        let policy = FailurePolicy::new()
            .absorb(0)
            .on(1, DomainError::NotFound(EntityKind::Class))
            .on(2, DomainError::NotFound(EntityKind::Course));

        let class_gone = match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(outcome) => {
                if !outcome.applied() {
                    debug!(class_id, assignment_id, "assignment already absent");
                }
                return Ok(());
            }
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(class_id, assignment_id, "course absent, updating class count only");
                let ops = vec![
                    WriteOp::delete(self.table(), key.clone(), Condition::Exists),
                    self.class_count(course_id, class_id, -1),
                ];
                let policy = FailurePolicy::new()
                    .absorb(0)
                    .on(1, DomainError::NotFound(EntityKind::Class));
                match self.ctx.coordinator.submit(ops, &policy).await {
                    Ok(_) => return Ok(()),
                    Err(err) if err.is_not_found() => err,
                    Err(err) => return Err(err),
                }
            }
            Err(err) if err.is_not_found() => err,
            Err(err) => return Err(err),
        };

        debug!(class_id, assignment_id, error = %class_gone, "class absent, deleting assignment alone");
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
