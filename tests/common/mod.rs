#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coursekv::storage::{QueryOutput, QueryRequest, WriteOp};
use coursekv::{
    Course, InMemoryStore, Item, ItemKey, KeyValueStore, Lesson, Repositories, RepositoryConfig,
    RetryPolicy, StoreError,
};
use tokio::time::Instant;

pub fn fast_config() -> RepositoryConfig {
    RepositoryConfig::new().retry(RetryPolicy {
        max_retries: 5,
        base_delay_ms: 1,
    })
}

pub async fn repos() -> (Repositories, Arc<InMemoryStore>) {
    Repositories::in_memory(&fast_config()).await
}

pub async fn seed_lesson(repos: &Repositories, course_id: i64, lesson_id: i64) {
    repos
        .courses
        .save_if_not_exists_or_throw(&Course::new(course_id, "Rust in practice"))
        .await
        .unwrap();
    repos
        .lessons
        .save_if_not_exists_or_throw(&Lesson::new(course_id, lesson_id, "Ownership"))
        .await
        .unwrap();
}

/// Hook run right before a transaction reaches the wrapped store.
pub type BeforeTransact = Box<dyn Fn(&[WriteOp]) -> Option<WriteOp> + Send + Sync>;

/// Store wrapper that records transaction timing and can slip a
/// concurrent write in ahead of each transaction.
pub struct InterceptingStore {
    inner: Arc<InMemoryStore>,
    before_transact: Option<BeforeTransact>,
    always_fail_first_item: bool,
    pub transacts: Mutex<Vec<Instant>>,
}

impl InterceptingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            before_transact: None,
            always_fail_first_item: false,
            transacts: Mutex::new(Vec::new()),
        }
    }

    pub fn before_transact(mut self, hook: BeforeTransact) -> Self {
        self.before_transact = Some(hook);
        self
    }

    /// Every transaction is canceled with its first item's condition failed.
    pub fn failing_first_item(mut self) -> Self {
        self.always_fail_first_item = true;
        self
    }

    pub fn transact_times(&self) -> Vec<Instant> {
        self.transacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyValueStore for InterceptingStore {
    async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.inner.get(table, key).await
    }

    async fn write(&self, op: WriteOp) -> Result<(), StoreError> {
        self.inner.write(op).await
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.transacts.lock().unwrap().push(Instant::now());

        if self.always_fail_first_item {
            let mut reasons = vec![coursekv::core::CancellationReason::None; ops.len()];
            reasons[0] = coursekv::core::CancellationReason::ConditionalCheckFailed;
            return Err(StoreError::TransactionCanceled {
                reasons: Some(reasons),
            });
        }

        if let Some(hook) = &self.before_transact {
            if let Some(concurrent) = hook(&ops) {
                self.inner.write(concurrent).await?;
            }
        }
        self.inner.transact(ops).await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError> {
        self.inner.query(request).await
    }
}
