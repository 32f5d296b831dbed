use crate::core::{DomainError, Item, ItemKey, Result, TableSchema, Value};
use crate::storage::{Condition, WriteOp};

use super::counters::{AggregateCounterMaintainer, CounterChange};
use super::transaction::FailurePolicy;

/// Position of the arrangement-version guard inside a reorder transaction.
pub const VERSION_GUARD_POSITION: usize = 2;

/// Fractional positioning for an ordered child collection whose sort key is
/// the position itself.
///
/// Inserting between neighbors never renumbers siblings. Repeated inserts
/// into the same gap halve it each time, so the integer midpoint eventually
/// collides with a neighbor; that case is reported as an internal error and
/// needs a renumbering pass that this layer does not perform.
#[derive(Debug, Clone)]
pub struct OrderedListPositioner {
    children: TableSchema,
    parent_table: String,
    version_field: &'static str,
}

impl OrderedListPositioner {
    pub fn new(children: TableSchema, parent_table: &str, version_field: &'static str) -> Self {
        Self {
            children,
            parent_table: parent_table.to_string(),
            version_field,
        }
    }

    /// New position between `upper` and `lower`, or past whichever one is
    /// missing.
    ///
    /// Both neighbors: rounded midpoint. Only `upper`: `upper * 1.5`.
    /// Only `lower`: `lower * 0.5`.
    pub fn compute_position(upper: Option<i64>, lower: Option<i64>) -> Result<i64> {
        let position = match (upper, lower) {
            (Some(upper), Some(lower)) => ((upper as f64 + lower as f64) / 2.0).round() as i64,
            (Some(upper), None) => (upper as f64 * 1.5).round() as i64,
            (None, Some(lower)) => (lower as f64 * 0.5).round() as i64,
            (None, None) => {
                return Err(DomainError::Internal(
                    "new position is not defined without a neighbor".to_string(),
                ));
            }
        };

        let collides = Some(position) == upper || Some(position) == lower;
        let between = match (upper, lower) {
            (Some(a), Some(b)) => position > a.min(b) && position < a.max(b),
            _ => true,
        };
        if position <= 0 || collides || !between {
            return Err(DomainError::Internal(format!(
                "position precision exhausted between {:?} and {:?}",
                upper, lower
            )));
        }
        Ok(position)
    }

    /// Transaction moving `item` to `new_position`:
    /// delete at the old key, insert at the new key, bump the parent's
    /// arrangement version guarded by `observed_version`.
    ///
    /// `guards` are extra equality checks on the moved item so the copy
    /// written is exactly the one deleted.
    pub fn reorder(
        &self,
        item: &Item,
        new_position: i64,
        parent_key: ItemKey,
        observed_version: i64,
        guards: Vec<(&str, Value)>,
    ) -> Result<Vec<WriteOp>> {
        let old_key = self.children.key_of(item)?;

        let mut moved = item.clone();
        moved.insert(self.children.sort_attr.clone(), Value::Integer(new_position));

        Ok(vec![
            WriteOp::delete(&self.children.name, old_key, Condition::exists_with(guards)),
            WriteOp::put(&self.children.name, moved, Condition::NotExists),
            AggregateCounterMaintainer::compare_and_set(
                &self.parent_table,
                parent_key,
                &[CounterChange::new(self.version_field, observed_version, 1)],
            ),
        ])
    }

    /// A failed version guard means someone else rearranged the collection
    /// after it was read; that is final. Other failures are stale reads.
    pub fn reorder_policy(&self) -> FailurePolicy {
        FailurePolicy::new().on(
            VERSION_GUARD_POSITION,
            DomainError::Conflict("arrangement changed since it was read".to_string()),
        )
    }
}
