//! Repository entry points, one per entity collection.
//!
//! Each repository composes the consistency primitives over a shared store
//! handle. Nothing here holds mutable state; concurrency control is left to
//! conditional writes and store transactions.

pub mod assignment;
pub mod attachment;
pub mod category;
pub mod class;
pub mod course;
pub mod enrollment;
pub mod lesson;
pub mod user;
pub mod video;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{RepositoryConfig, TableNames};
use crate::consistency::{OptimisticRetryExecutor, PaginationCursorWalker, TransactionalWriteCoordinator};
use crate::core::{DomainError, Item, ItemKey, Result, to_item};
use crate::storage::{InMemoryStore, KeyValueStore, UpdateAction};

pub use assignment::{Assignment, AssignmentPatch, AssignmentRepository};
pub use attachment::{Attachment, AttachmentPatch, AttachmentRepository};
pub use category::{Category, CategoryRepository};
pub use class::{Class, ClassPatch, ClassRepository};
pub use course::{Course, CoursePatch, CourseRepository};
pub use enrollment::{Enrollment, EnrollmentRepository};
pub use lesson::{Lesson, LessonPatch, LessonRepository};
pub use user::{User, UserPatch, UserRepository};
pub use video::{PositionUpdate, Video, VideoPatch, VideoRepository};

/// Read-only course lookup used by repositories of descendant entities.
#[async_trait]
pub trait CourseLookup: Send + Sync {
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>>;
}

/// Read-only lesson lookup used by repositories of descendant entities.
#[async_trait]
pub trait LessonLookup: Send + Sync {
    async fn find_lesson(&self, course_id: i64, lesson_id: i64) -> Result<Option<Lesson>>;
}

/// Everything a repository needs to talk to the store.
#[derive(Clone)]
pub struct RepositoryContext {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) tables: TableNames,
    pub(crate) coordinator: TransactionalWriteCoordinator,
    pub(crate) retry: OptimisticRetryExecutor,
    pub(crate) walker: PaginationCursorWalker,
}

impl RepositoryContext {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &RepositoryConfig) -> Self {
        Self {
            coordinator: TransactionalWriteCoordinator::new(
                store.clone(),
                config.max_transaction_items,
            ),
            retry: OptimisticRetryExecutor::new(config.retry.clone()),
            walker: PaginationCursorWalker::new(store.clone()),
            tables: config.tables.clone(),
            store,
        }
    }

    pub(crate) async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        Ok(self.store.get(table, key).await?)
    }
}

/// Serializes a record and stamps its constant partition attribute.
pub(crate) fn record_item<T: Serialize>(record: &T, partition: Option<(&str, &str)>) -> Result<Item> {
    let mut item = to_item(record)?;
    if let Some((attr, value)) = partition {
        item.insert(attr.to_string(), value.into());
    }
    Ok(item)
}

/// `SET` actions for every present field of a patch, minus key attributes.
pub(crate) fn patch_actions<T: Serialize>(patch: &T, keys: &[&str]) -> Result<Vec<UpdateAction>> {
    let item = to_item(patch).map_err(DomainError::from)?;
    Ok(item
        .into_iter()
        .filter(|(attr, _)| !keys.contains(&attr.as_str()))
        .map(|(attr, value)| UpdateAction::Set(attr, value))
        .collect())
}

/// All repositories wired over one store handle.
#[derive(Clone)]
pub struct Repositories {
    pub courses: Arc<CourseRepository>,
    pub lessons: Arc<LessonRepository>,
    pub videos: Arc<VideoRepository>,
    pub attachments: Arc<AttachmentRepository>,
    pub classes: Arc<ClassRepository>,
    pub assignments: Arc<AssignmentRepository>,
    pub enrollments: Arc<EnrollmentRepository>,
    pub categories: Arc<CategoryRepository>,
    pub users: Arc<UserRepository>,
}

impl Repositories {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &RepositoryConfig) -> Self {
        let ctx = RepositoryContext::new(store, config);
        let courses = Arc::new(CourseRepository::new(ctx.clone()));
        let lessons = Arc::new(LessonRepository::new(ctx.clone()));
        let videos = Arc::new(VideoRepository::new(
            ctx.clone(),
            courses.clone(),
            lessons.clone(),
        ));
        Self {
            attachments: Arc::new(AttachmentRepository::new(ctx.clone())),
            classes: Arc::new(ClassRepository::new(ctx.clone())),
            assignments: Arc::new(AssignmentRepository::new(ctx.clone())),
            enrollments: Arc::new(EnrollmentRepository::new(ctx.clone())),
            categories: Arc::new(CategoryRepository::new(ctx.clone())),
            users: Arc::new(UserRepository::new(ctx)),
            courses,
            lessons,
            videos,
        }
    }

    /// Repositories over a fresh [`InMemoryStore`] with every table created.
    pub async fn in_memory(config: &RepositoryConfig) -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        for schema in config.tables.schemas() {
            store.create_table(schema).await;
        }
        (Self::new(store.clone(), config), store)
    }
}
