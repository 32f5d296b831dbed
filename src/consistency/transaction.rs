use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{CancellationReason, DomainError, Result, StoreError};
use crate::storage::{KeyValueStore, WriteOp};

/// What a failed write item translates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureResolution {
    /// Surface this error to the caller (or to the retry loop).
    Fail(DomainError),
    /// Treat the failure as success; nothing was written.
    Absorb,
}

/// Whether a submitted write was applied or its failure was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Absorbed,
}

impl WriteOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Positional mapping from failed transaction items to domain outcomes.
///
/// Failed positions are visited in item order; the first one with a rule
/// decides. When no failed position has a rule, `otherwise` applies, which
/// defaults to [`DomainError::PreconditionChanged`] so the enclosing retry
/// loop re-reads and tries again.
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    rules: Vec<(usize, FailureResolution)>,
    otherwise: FailureResolution,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FailurePolicy {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            otherwise: FailureResolution::Fail(DomainError::PreconditionChanged),
        }
    }

    pub fn on(mut self, position: usize, error: DomainError) -> Self {
        self.rules.push((position, FailureResolution::Fail(error)));
        self
    }

    pub fn absorb(mut self, position: usize) -> Self {
        self.rules.push((position, FailureResolution::Absorb));
        self
    }

    pub fn otherwise(mut self, error: DomainError) -> Self {
        self.otherwise = FailureResolution::Fail(error);
        self
    }

    fn rule_for(&self, position: usize) -> Option<&FailureResolution> {
        self.rules
            .iter()
            .find(|(rule_position, _)| *rule_position == position)
            .map(|(_, resolution)| resolution)
    }

    /// Maps per-item cancellation reasons to a resolution.
    ///
    /// Missing reasons, or reasons that name no failed item, carry no
    /// usable detail and classify as internal errors.
    pub fn classify(&self, reasons: Option<&[CancellationReason]>) -> FailureResolution {
        let Some(reasons) = reasons else {
            return FailureResolution::Fail(DomainError::Internal(
                "transaction canceled without cancellation reasons".to_string(),
            ));
        };

        let mut failed = reasons
            .iter()
            .enumerate()
            .filter(|(_, reason)| reason.is_condition_failure())
            .map(|(position, _)| position)
            .peekable();

        if failed.peek().is_none() {
            return FailureResolution::Fail(DomainError::Internal(
                "transaction canceled for a reason other than a failed condition".to_string(),
            ));
        }

        failed
            .find_map(|position| self.rule_for(position).cloned())
            .unwrap_or_else(|| self.otherwise.clone())
    }
}

/// Submits grouped conditional writes and translates store failures into
/// domain errors.
#[derive(Clone)]
pub struct TransactionalWriteCoordinator {
    store: Arc<dyn KeyValueStore>,
    max_items: usize,
}

impl TransactionalWriteCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, max_items: usize) -> Self {
        Self { store, max_items }
    }

    /// Applies `ops` atomically.
    pub async fn submit(&self, ops: Vec<WriteOp>, policy: &FailurePolicy) -> Result<WriteOutcome> {
        if ops.len() > self.max_items {
            return Err(DomainError::Internal(format!(
                "transaction of {} items exceeds the limit of {}",
                ops.len(),
                self.max_items
            )));
        }

        let item_count = ops.len();
        debug!(items = item_count, "submitting transaction");

        match self.store.transact(ops).await {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(StoreError::TransactionCanceled { reasons }) => {
                let resolution = policy.classify(reasons.as_deref());
                debug!(items = item_count, ?reasons, ?resolution, "transaction canceled");
                resolve(resolution)
            }
            Err(other) => {
                warn!(items = item_count, error = %other, "transaction failed");
                Err(other.into())
            }
        }
    }

    /// Applies one conditional write, mapping a failed condition to
    /// `on_condition_failed`.
    pub async fn write(
        &self,
        op: WriteOp,
        on_condition_failed: FailureResolution,
    ) -> Result<WriteOutcome> {
        let kind = op.kind();
        match self.store.write(op).await {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(StoreError::ConditionalCheckFailed { table, key }) => {
                debug!(%table, %key, kind, "conditional write rejected");
                resolve(on_condition_failed)
            }
            Err(other) => {
                warn!(kind, error = %other, "conditional write failed");
                Err(other.into())
            }
        }
    }
}

fn resolve(resolution: FailureResolution) -> Result<WriteOutcome> {
    match resolution {
        FailureResolution::Fail(error) => Err(error),
        FailureResolution::Absorb => Ok(WriteOutcome::Absorbed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityKind;
    use crate::core::CancellationReason::{ConditionalCheckFailed as Failed, None as Passed};

    fn policy() -> FailurePolicy {
        FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::Video))
            .on(1, DomainError::NotFound(EntityKind::Lesson))
    }

    #[test]
    fn first_failed_position_with_a_rule_wins() {
        let resolution = policy().classify(Some(&[Failed, Failed, Passed][..]));
        assert_eq!(
            resolution,
            FailureResolution::Fail(DomainError::DuplicateKey(EntityKind::Video))
        );

        let resolution = policy().classify(Some(&[Passed, Failed, Failed][..]));
        assert_eq!(
            resolution,
            FailureResolution::Fail(DomainError::NotFound(EntityKind::Lesson))
        );
    }

    #[test]
    fn unmapped_failures_fall_back_to_retryable() {
        let resolution = policy().classify(Some(&[Passed, Passed, Failed][..]));
        assert_eq!(resolution, FailureResolution::Fail(DomainError::PreconditionChanged));
    }

    #[test]
    fn missing_detail_is_internal() {
        assert!(matches!(
            policy().classify(None),
            FailureResolution::Fail(DomainError::Internal(_))
        ));
        assert!(matches!(
            policy().classify(Some(&[Passed, Passed][..])),
            FailureResolution::Fail(DomainError::Internal(_))
        ));
    }

    #[test]
    fn absorb_rules() {
        let policy = FailurePolicy::new().absorb(0).on(1, DomainError::NotFound(EntityKind::Course));
        assert_eq!(policy.classify(Some(&[Failed, Failed][..])), FailureResolution::Absorb);
    }
}
