use serde::{Deserialize, Serialize};

use crate::core::TableSchema;

/// Physical table names for each entity collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub course: String,
    pub lesson: String,
    pub video: String,
    pub attachment: String,
    pub class: String,
    pub assignment: String,
    pub enrollment: String,
    pub category: String,
    pub user: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            course: "courses".to_string(),
            lesson: "lessons".to_string(),
            video: "videos".to_string(),
            attachment: "attachments".to_string(),
            class: "classes".to_string(),
            assignment: "class_assignments".to_string(),
            enrollment: "enrollments".to_string(),
            category: "categories".to_string(),
            user: "users".to_string(),
        }
    }
}

impl TableNames {
    /// Key layout of every table, for stores that need it declared up front.
    pub fn schemas(&self) -> Vec<TableSchema> {
        vec![
            TableSchema::new(&self.course, "id", "courseId"),
            TableSchema::new(&self.lesson, "courseId", "lessonId"),
            TableSchema::new(&self.video, "lessonId", "videoId"),
            TableSchema::new(&self.attachment, "lessonId", "attachmentId"),
            TableSchema::new(&self.class, "courseId", "classId"),
            TableSchema::new(&self.assignment, "classId", "assignmentId"),
            TableSchema::new(&self.enrollment, "userId", "courseId"),
            TableSchema::new(&self.category, "id", "categoryId"),
            TableSchema::new(&self.user, "id", "userId"),
        ]
    }
}

/// Bounded exponential backoff for optimistic read-modify-write sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` is `base_delay_ms * 2^n`.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given 1-based retry.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let factor = 2u64.saturating_pow(retry);
        self.base_delay_ms.saturating_mul(factor)
    }
}

/// Configuration shared by all repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub tables: TableNames,
    pub retry: RetryPolicy,
    /// Item limit of one atomic transaction in the backing store.
    pub max_transaction_items: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            retry: RetryPolicy::default(),
            max_transaction_items: 100,
        }
    }
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the table names
    pub fn tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-transaction item limit
    pub fn max_transaction_items(mut self, max: usize) -> Self {
        self.max_transaction_items = max;
        self
    }

    /// Parse from a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| format!("Invalid config: {}", err))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_transaction_items < 3 {
            return Err("max_transaction_items must be >= 3".to_string());
        }

        let names = [
            &self.tables.course,
            &self.tables.lesson,
            &self.tables.video,
            &self.tables.attachment,
            &self.tables.class,
            &self.tables.assignment,
            &self.tables.enrollment,
            &self.tables.category,
            &self.tables.user,
        ];
        if names.iter().any(|name| name.is_empty()) {
            return Err("Table names cannot be empty".to_string());
        }

        Ok(())
    }
}
