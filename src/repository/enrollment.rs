use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::course::{NUMBER_OF_STUDENTS, course_key};
use super::{RepositoryContext, record_item};
use crate::consistency::{
    AggregateCounterMaintainer, CounterDelta, FailurePolicy, FailureResolution, Page, Pagination,
};
use crate::core::{DomainError, EntityKind, ItemKey, Result, from_item};
use crate::storage::{Condition, WriteOp};

/// A user's enrollment in a course, listed per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub user_id: i64,
    pub course_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(user_id: i64, course_id: i64) -> Self {
        Self {
            user_id,
            course_id,
            created_at: Utc::now(),
        }
    }
}

pub fn enrollment_key(user_id: i64, course_id: i64) -> ItemKey {
    ItemKey::new(user_id, course_id)
}

pub struct EnrollmentRepository {
    ctx: RepositoryContext,
}

impl EnrollmentRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.enrollment
    }

    fn student_count(&self, course_id: i64, delta: i64) -> WriteOp {
        AggregateCounterMaintainer::increment(
            &self.ctx.tables.course,
            course_key(course_id),
            &[CounterDelta::new(NUMBER_OF_STUDENTS, delta)],
        )
    }

    pub async fn save_if_not_exists_or_throw(&self, enrollment: &Enrollment) -> Result<()> {
        let ops = vec![
            WriteOp::put(self.table(), record_item(enrollment, None)?, Condition::NotExists),
            self.student_count(enrollment.course_id, 1),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Enrollment))
            .on(1, DomainError::NotFound(EntityKind::Course));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(user_id = enrollment.user_id, course_id = enrollment.course_id, "user enrolled");
        Ok(())
    }

    pub async fn find_by_id(&self, user_id: i64, course_id: i64) -> Result<Option<Enrollment>> {
        let item = self
            .ctx
            .get(self.table(), &enrollment_key(user_id, course_id))
            .await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, user_id: i64, course_id: i64) -> Result<Enrollment> {
        self.find_by_id(user_id, course_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::Enrollment))
    }

    /// Enrollments of one user, most recent course id first.
    pub async fn find_many(&self, user_id: i64, pagination: &Pagination) -> Result<Page<Enrollment>> {
        self.ctx
            .walker
            .walk(self.table(), user_id, pagination)
            .await?
            .into_records()
    }

    pub async fn delete_if_exists_or_throw(&self, user_id: i64, course_id: i64) -> Result<()> {
        let key = enrollment_key(user_id, course_id);
        let ops = vec![
            WriteOp::delete(self.table(), key.clone(), Condition::Exists),
            self.student_count(course_id, -1),
        ];
        let policy = FailurePolicy::new()
            .absorb(0)
            .on(1, DomainError::NotFound(EntityKind::Course));

        match self.ctx.coordinator.submit(ops, &policy).await {
            Ok(_) => Ok(()),
            Err(DomainError::NotFound(EntityKind::Course)) => {
                debug!(user_id, course_id, "course absent, deleting enrollment alone");
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
