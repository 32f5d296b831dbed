use std::sync::Arc;

use crate::core::{DomainError, Item, ItemKey, Result, TableSchema, Value};
use crate::storage::{Condition, KeyValueStore, UpdateAction, WriteOp};

use super::transaction::FailurePolicy;

const OWNER_ATTR: &str = "ownerId";

/// Emulated global uniqueness constraint.
///
/// A marker item keyed by the unique value lives in the owner's table; its
/// existence means the value is taken. Markers are only ever written in the
/// same transaction as the owning record, so the two cannot drift apart.
#[derive(Debug, Clone)]
pub struct UniqueConstraintIndex {
    schema: TableSchema,
    /// Partition prefix separating markers from records and from other indexes.
    scope: &'static str,
    /// Attribute on the owning record holding the unique value.
    field: &'static str,
}

impl UniqueConstraintIndex {
    pub fn new(schema: TableSchema, scope: &'static str, field: &'static str) -> Self {
        Self {
            schema,
            scope,
            field,
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn marker_key(&self, value: &str) -> ItemKey {
        ItemKey::new(format!("{}#{}", self.scope, value), 0)
    }

    pub fn violation(&self, value: &str) -> DomainError {
        DomainError::UniqueConstraintViolation {
            field: self.field,
            value: value.to_string(),
        }
    }

    fn marker(&self, value: &str, owner: i64) -> Item {
        let mut item = Item::new();
        self.schema.stamp_key(&mut item, &self.marker_key(value));
        item.insert(OWNER_ATTR.to_string(), Value::Integer(owner));
        item
    }

    /// Insert of the marker; fails its condition when the value is taken.
    pub fn reserve(&self, value: &str, owner: i64) -> WriteOp {
        WriteOp::put(&self.schema.name, self.marker(value, owner), Condition::NotExists)
    }

    /// Delete of the marker, conditioned on its existence.
    pub fn release(&self, value: &str) -> WriteOp {
        WriteOp::delete(&self.schema.name, self.marker_key(value), Condition::Exists)
    }

    /// The three items of a rename, in this order: owner update guarded by
    /// the old value, new marker insert, old marker delete.
    pub fn rename(&self, owner_key: ItemKey, owner: i64, old: &str, new: &str) -> Vec<WriteOp> {
        vec![
            WriteOp::update(
                &self.schema.name,
                owner_key,
                vec![UpdateAction::set(self.field, new)],
                Condition::exists_with(vec![(self.field, Value::from(old))]),
            ),
            self.reserve(new, owner),
            self.release(old),
        ]
    }

    /// Classification for [`rename`](Self::rename): a failed marker insert
    /// means the value is taken; anything else is a stale read.
    pub fn rename_policy(&self, new: &str) -> FailurePolicy {
        FailurePolicy::new().on(1, self.violation(new))
    }

    /// Owner of a taken value, if any.
    pub async fn owner_of(&self, store: &Arc<dyn KeyValueStore>, value: &str) -> Result<Option<i64>> {
        let marker = store.get(&self.schema.name, &self.marker_key(value)).await?;
        Ok(marker.and_then(|item| item.get(OWNER_ATTR).and_then(Value::as_integer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::FailureResolution;
    use crate::storage::InMemoryStore;

    fn index() -> UniqueConstraintIndex {
        UniqueConstraintIndex::new(TableSchema::new("users", "id", "userId"), "EMAIL", "email")
    }

    #[tokio::test]
    async fn reserve_then_lookup_owner() {
        let memory = Arc::new(InMemoryStore::new());
        memory.create_table(TableSchema::new("users", "id", "userId")).await;
        let store: Arc<dyn KeyValueStore> = memory;

        let index = index();
        store.write(index.reserve("ada@example.com", 7)).await.unwrap();
        assert_eq!(index.owner_of(&store, "ada@example.com").await.unwrap(), Some(7));
        assert_eq!(index.owner_of(&store, "bob@example.com").await.unwrap(), None);

        assert!(store.write(index.reserve("ada@example.com", 8)).await.is_err());
    }

    #[test]
    fn rename_policy_maps_marker_insert_to_violation() {
        use crate::core::CancellationReason::{ConditionalCheckFailed as Failed, None as Passed};
        let index = index();
        let policy = index.rename_policy("new@example.com");

        assert_eq!(
            policy.classify(Some(&[Passed, Failed, Passed][..])),
            FailureResolution::Fail(index.violation("new@example.com"))
        );
        assert_eq!(
            policy.classify(Some(&[Failed, Passed, Passed][..])),
            FailureResolution::Fail(DomainError::PreconditionChanged)
        );
    }
}
