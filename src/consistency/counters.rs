use crate::core::{Item, ItemKey, Value};
use crate::storage::{Condition, UpdateAction, WriteOp};

/// A commutative change to a roll-up counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub field: &'static str,
    pub delta: i64,
}

impl CounterDelta {
    pub fn new(field: &'static str, delta: i64) -> Self {
        Self { field, delta }
    }

    pub fn negated(&self) -> Self {
        Self {
            field: self.field,
            delta: -self.delta,
        }
    }
}

/// A change computed from a previously read counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterChange {
    pub field: &'static str,
    pub observed: i64,
    pub delta: i64,
}

impl CounterChange {
    pub fn new(field: &'static str, observed: i64, delta: i64) -> Self {
        Self {
            field,
            observed,
            delta,
        }
    }
}

/// Builds the ancestor-side writes that keep denormalized counters equal
/// to the count (or sum) over existing children.
///
/// Every write produced here belongs in the same transaction as the child
/// write that changes the true value.
pub struct AggregateCounterMaintainer;

impl AggregateCounterMaintainer {
    /// `ADD` each delta on the ancestor, requiring only that it exists.
    pub fn increment(table: &str, key: ItemKey, deltas: &[CounterDelta]) -> WriteOp {
        let actions = deltas
            .iter()
            .map(|d| UpdateAction::add(d.field, d.delta))
            .collect();
        WriteOp::update(table, key, actions, Condition::Exists)
    }

    /// Mirror of [`increment`](Self::increment) for child removal.
    pub fn decrement(table: &str, key: ItemKey, deltas: &[CounterDelta]) -> WriteOp {
        let negated: Vec<CounterDelta> = deltas.iter().map(CounterDelta::negated).collect();
        Self::increment(table, key, &negated)
    }

    /// `SET field = observed + delta` guarded by `field == observed`.
    ///
    /// For deltas that depend on a value read beforehand; pair with the
    /// retry executor so a stale read is re-done rather than lost.
    pub fn compare_and_set(table: &str, key: ItemKey, changes: &[CounterChange]) -> WriteOp {
        let guard = Condition::exists_with(
            changes
                .iter()
                .map(|c| (c.field, Value::Integer(c.observed)))
                .collect(),
        );
        let actions = changes
            .iter()
            .map(|c| UpdateAction::set(c.field, c.observed + c.delta))
            .collect();
        WriteOp::update(table, key, actions, guard)
    }

    /// Current counter value on a stored record; absent counts as zero.
    pub fn read(item: &Item, field: &str) -> i64 {
        item.get(field).and_then(Value::as_integer).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_adds_under_existence_condition() {
        let op = AggregateCounterMaintainer::increment(
            "courses",
            ItemKey::new("COURSE", 1),
            &[CounterDelta::new("numberOfStudents", 1)],
        );
        assert_eq!(
            op,
            WriteOp::update(
                "courses",
                ItemKey::new("COURSE", 1),
                vec![UpdateAction::add("numberOfStudents", 1)],
                Condition::Exists,
            )
        );
    }

    #[test]
    fn decrement_negates() {
        let op = AggregateCounterMaintainer::decrement(
            "lessons",
            ItemKey::new(1, 2),
            &[CounterDelta::new("numberOfVideos", 1), CounterDelta::new("numberOfDurations", 90)],
        );
        let WriteOp::Update { actions, .. } = op else {
            panic!("expected update");
        };
        assert_eq!(
            actions,
            vec![
                UpdateAction::add("numberOfVideos", -1),
                UpdateAction::add("numberOfDurations", -90)
            ]
        );
    }

    #[test]
    fn compare_and_set_guards_observed_values() {
        let op = AggregateCounterMaintainer::compare_and_set(
            "lessons",
            ItemKey::new(1, 2),
            &[CounterChange::new("numberOfDurations", 300, -45)],
        );
        let WriteOp::Update {
            actions, condition, ..
        } = op
        else {
            panic!("expected update");
        };
        assert_eq!(actions, vec![UpdateAction::set("numberOfDurations", 255)]);

        let mut lesson = Item::new();
        lesson.insert("numberOfDurations".into(), Value::Integer(300));
        assert!(condition.evaluate(Some(&lesson)));
        lesson.insert("numberOfDurations".into(), Value::Integer(301));
        assert!(!condition.evaluate(Some(&lesson)));
    }
}
