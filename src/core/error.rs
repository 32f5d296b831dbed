use std::fmt;

use thiserror::Error;

/// Why a single item of a canceled transaction did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The item's condition held; it was canceled because another item failed.
    None,
    /// The item's own condition evaluated to false.
    ConditionalCheckFailed,
}

impl CancellationReason {
    pub fn is_condition_failure(&self) -> bool {
        matches!(self, Self::ConditionalCheckFailed)
    }
}

/// Failures reported by the key-value store itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conditional check failed for {table} {key}")]
    ConditionalCheckFailed { table: String, key: String },

    /// `reasons` is per item, in submission order, when the store supplies it.
    #[error("Transaction canceled")]
    TransactionCanceled {
        reasons: Option<Vec<CancellationReason>>,
    },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Entity collections managed by the repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Course,
    Lesson,
    Video,
    Attachment,
    Class,
    Assignment,
    Enrollment,
    Category,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Course => "course",
            Self::Lesson => "lesson",
            Self::Video => "video",
            Self::Attachment => "attachment",
            Self::Class => "class",
            Self::Assignment => "assignment",
            Self::Enrollment => "enrollment",
            Self::Category => "category",
            Self::User => "user",
        };
        write!(f, "{label}")
    }
}

/// Error taxonomy exposed by the repository layer.
///
/// Store failures are translated into these kinds at the transaction
/// boundary; callers branch on the variant, never on store error shapes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("{0} with the same key already exists")]
    DuplicateKey(EntityKind),

    #[error("{field} '{value}' is already taken")]
    UniqueConstraintViolation { field: &'static str, value: String },

    #[error("resource conflict, retry later: {0}")]
    Conflict(String),

    /// State read earlier no longer holds at commit time. Consumed by the
    /// retry executor and never returned from a repository.
    #[error("precondition changed since read")]
    PreconditionChanged,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PreconditionChanged)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
