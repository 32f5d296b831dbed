// ============================================================================
// coursekv: transactional consistency layer over a key-value store
// ============================================================================

pub mod config;
pub mod consistency;
pub mod core;
pub mod repository;
pub mod storage;

// Re-export main types for convenience
pub use config::{RepositoryConfig, RetryPolicy, TableNames};
pub use core::{DomainError, EntityKind, Item, ItemKey, Result, StoreError, Value};
pub use consistency::{Page, Pagination};
pub use repository::{
    Assignment, AssignmentPatch, Attachment, AttachmentPatch, Category, Class, ClassPatch, Course,
    CoursePatch, Enrollment, Lesson, LessonPatch, PositionUpdate, Repositories, RepositoryContext,
    User, UserPatch, Video, VideoPatch,
};
pub use storage::{Cursor, InMemoryStore, InMemoryStoreConfig, KeyValueStore};
