//! Tagged result of one unit of work, produced before any policy decision.

use crate::events::FailureDetail;
use crate::telemetry::ExecutionStatus;

/// How an error is reported at the tracker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recognized failure kind; one-line log.
    Framework,
    /// Unexpected error or panic; full diagnostic log.
    Unclassified,
}

/// Classified outcome of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Completed normally.
    Success,
    /// Failed; the class drives logging, the detail is persisted.
    Error {
        /// Reporting class.
        class: ErrorClass,
        /// Persisted error fields.
        detail: FailureDetail,
    },
    /// Cooperatively cancelled.
    Cancelled,
}

impl ExecutionResult {
    /// Persisted status for this outcome.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Success => ExecutionStatus::Success,
            ExecutionResult::Error { .. } => ExecutionStatus::Error,
            ExecutionResult::Cancelled => ExecutionStatus::Cancelled,
        }
    }

    /// Error detail, for `Error` outcomes.
    pub fn detail(&self) -> Option<&FailureDetail> {
        match self {
            ExecutionResult::Error { detail, .. } => Some(detail),
            _ => None,
        }
    }
}
