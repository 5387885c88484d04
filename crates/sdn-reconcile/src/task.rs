//! Reconcile outcome classification.

use crate::Constraint;
use thiserror::Error;

/// Classified outcome of a single reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Pass completed
    Success,
    /// Desired state failed validation; the spec is left untouched
    Invalid,
    /// The switch could not be reached
    Unreachable,
    /// A single device call failed
    Failed,
    /// Pass should be retried on the next tick
    NeedRetry,
    /// Duplicate create; counts as success
    Conflict,
    /// Pass is waiting for another record to appear
    WaitingForDependency,
}

impl TaskStatus {
    /// Returns true if the pass counts as successful.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Conflict)
    }

    /// Returns true if the pass is retried by the scheduler.
    ///
    /// Every failure is retried on a later tick; validation failures are
    /// retried against the same target without touching the spec.
    pub fn is_retryable(&self) -> bool {
        !self.is_success()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Invalid => "invalid",
            TaskStatus::Unreachable => "unreachable",
            TaskStatus::Failed => "failed",
            TaskStatus::NeedRetry => "need_retry",
            TaskStatus::Conflict => "conflict",
            TaskStatus::WaitingForDependency => "waiting",
        }
    }
}

/// Error type for reconcile failures.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Switch unreachable: {message}")]
    Connectivity { message: String },

    #[error("Device call failed: {message}")]
    TransientDevice { message: String },

    #[error("Retry needed: {reason}")]
    NeedRetry { reason: String },

    /// Duplicate create. Reported for visibility, handled as success.
    #[error("Already exists: {message}")]
    Conflict { message: String },

    #[error("Waiting for dependency: {constraint}")]
    WaitingForDependency { constraint: Constraint },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation {
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        TaskError::Connectivity {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        TaskError::TransientDevice {
            message: message.into(),
        }
    }

    pub fn need_retry(reason: impl Into<String>) -> Self {
        TaskError::NeedRetry {
            reason: reason.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        TaskError::Conflict {
            message: message.into(),
        }
    }

    /// Creates a dependency wait on another record.
    pub fn waiting_for(constraint: Constraint) -> Self {
        TaskError::WaitingForDependency { constraint }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Converts this error to a TaskStatus.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::Validation { .. } => TaskStatus::Invalid,
            TaskError::Connectivity { .. } => TaskStatus::Unreachable,
            TaskError::TransientDevice { .. } => TaskStatus::Failed,
            TaskError::NeedRetry { .. } => TaskStatus::NeedRetry,
            TaskError::Conflict { .. } => TaskStatus::Conflict,
            TaskError::WaitingForDependency { .. } => TaskStatus::WaitingForDependency,
            TaskError::Internal { .. } => TaskStatus::Failed,
        }
    }
}

/// Result type for reconcile passes.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting TaskResult to TaskStatus.
pub trait TaskResultExt {
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}
