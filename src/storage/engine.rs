use async_trait::async_trait;

use super::ops::{QueryOutput, QueryRequest, WriteOp};
use crate::core::{Item, ItemKey, StoreError};

/// Key-value store capability consumed by the consistency layer.
///
/// Implementations must be process-wide shareable handles; the layer keeps
/// no other mutable state, so every guarantee below comes from the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point read by primary key.
    async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Single conditional write. A false condition fails with
    /// `StoreError::ConditionalCheckFailed` and leaves the item untouched.
    async fn write(&self, op: WriteOp) -> Result<(), StoreError>;

    /// All-or-nothing write of an ordered list of operations.
    ///
    /// On a failed condition the whole transaction is canceled with
    /// `StoreError::TransactionCanceled`, carrying one reason per item in
    /// submission order when the store can provide it.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Bounded range scan over a single partition, descending by sort key.
    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError>;
}
