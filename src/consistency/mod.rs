//! Primitives that keep cross-item invariants intact on a store offering
//! only conditional item writes and bounded transactions.

pub mod counters;
pub mod pagination;
pub mod position;
pub mod retry;
pub mod transaction;
pub mod unique;

pub use counters::{AggregateCounterMaintainer, CounterChange, CounterDelta};
pub use pagination::{Page, Pagination, PaginationCursorWalker};
pub use position::{OrderedListPositioner, VERSION_GUARD_POSITION};
pub use retry::OptimisticRetryExecutor;
pub use transaction::{FailurePolicy, FailureResolution, TransactionalWriteCoordinator, WriteOutcome};
pub use unique::UniqueConstraintIndex;
