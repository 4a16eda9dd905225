use serde::{Deserialize, Serialize};

use super::errors::TransitionError;
use super::states::{StepStatus, TransactionStatus};

/// Events that drive transaction status transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// Begin running the forward commands
    StartCommit,
    /// Every forward command succeeded
    Complete,
    /// A forward command failed or the commit faulted
    Fail(String),
    /// Compensations were executed
    RollBack,
}

impl TransactionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StartCommit => "start_commit",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::RollBack => "roll_back",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    fn target(&self) -> TransactionStatus {
        match self {
            Self::StartCommit => TransactionStatus::Running,
            Self::Complete => TransactionStatus::Committed,
            Self::Fail(_) => TransactionStatus::Failed,
            Self::RollBack => TransactionStatus::RolledBack,
        }
    }
}

impl TransactionStatus {
    /// Status after applying `event`, if the transition is allowed
    pub fn apply(self, event: &TransactionEvent) -> Result<Self, TransitionError> {
        let next = event.target();
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::new("transaction", self, event.event_type()))
        }
    }
}

/// Events that drive workflow step status transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    /// Start running the step
    Start,
    /// The collaborator reported success
    Complete,
    /// Failure, timeout or cancellation
    Fail(String),
    /// Checkpoint rollback discarded this step's progress
    Reset,
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Reset => "reset",
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

impl StepStatus {
    /// Status after applying `event`, if the transition is allowed
    ///
    /// A failed step never becomes completed, so a collaborator finishing
    /// after cancellation cannot overwrite the failure.
    pub fn apply(self, event: &StepEvent) -> Result<Self, TransitionError> {
        match (self, event) {
            (Self::Pending, StepEvent::Start) => Ok(Self::Running),
            (Self::Running, StepEvent::Complete) => Ok(Self::Completed),
            (Self::Pending | Self::Running, StepEvent::Fail(_)) => Ok(Self::Failed),
            (_, StepEvent::Reset) => Ok(Self::Pending),
            (from, event) => Err(TransitionError::new("step", from, event.event_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_event_application() {
        let status = TransactionStatus::Pending;
        let status = status.apply(&TransactionEvent::StartCommit).unwrap();
        let status = status.apply(&TransactionEvent::Fail("boom".into())).unwrap();
        assert_eq!(status, TransactionStatus::Failed);
        assert_eq!(
            status.apply(&TransactionEvent::RollBack).unwrap(),
            TransactionStatus::RolledBack
        );

        let err = TransactionStatus::Committed
            .apply(&TransactionEvent::Fail("late".into()))
            .unwrap_err();
        assert!(err.to_string().contains("committed"));
    }

    #[test]
    fn test_failed_step_cannot_complete() {
        let failed = StepStatus::Running
            .apply(&StepEvent::fail_with_error("Workflow cancelled by user"))
            .unwrap();
        assert_eq!(failed, StepStatus::Failed);
        assert!(failed.apply(&StepEvent::Complete).is_err());
        assert_eq!(failed.apply(&StepEvent::Reset).unwrap(), StepStatus::Pending);
    }
}
