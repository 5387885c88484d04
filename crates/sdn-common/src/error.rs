//! Error types for controller operations.
//!
//! This module defines the error taxonomy shared by the switch client and
//! every reconciler. All errors implement `std::error::Error` via `thiserror`.

use sdn_reconcile::{StoreError, TaskError};
use thiserror::Error;

/// Result type alias for controller operations.
pub type SdnResult<T> = Result<T, SdnError>;

/// Errors that can occur while converging switch state.
#[derive(Debug, Clone, Error)]
pub enum SdnError {
    /// Desired value rejected (unknown VLAN, malformed override, spine mutation).
    #[error("Validation failed for {resource}: {message}")]
    Validation {
        /// The resource the value belongs to.
        resource: String,
        /// Error message.
        message: String,
    },

    /// Switch unreachable.
    #[error("Switch '{switch}' unreachable: {message}")]
    Connectivity {
        /// Switch FQDN.
        switch: String,
        /// Error message.
        message: String,
    },

    /// A single device call failed.
    #[error("Device call {operation} on '{switch}' failed: {message}")]
    TransientDevice {
        /// Switch FQDN.
        switch: String,
        /// The operation that failed (e.g., "update_vlan").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Resource already exists.
    #[error("Conflict on {resource}: {message}")]
    Conflict {
        /// The conflicting resource.
        resource: String,
        /// Error message.
        message: String,
    },

    /// Referenced record or device object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Record kind or device object type.
        kind: String,
        /// The key.
        name: String,
    },

    /// Record is owned by a different parent.
    #[error("{resource} is already owned by {owner}")]
    AlreadyOwned {
        /// The owned resource.
        resource: String,
        /// Current owner.
        owner: String,
    },

    /// State store operation failed.
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl SdnError {
    /// Creates a validation error.
    pub fn validation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a connectivity error.
    pub fn connectivity(switch: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            switch: switch.into(),
            message: message.into(),
        }
    }

    /// Creates a transient device error.
    pub fn transient(
        switch: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TransientDevice {
            switch: switch.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates an already owned error.
    pub fn already_owned(resource: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::AlreadyOwned {
            resource: resource.into(),
            owner: owner.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on the next tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            SdnError::Connectivity { .. }
            | SdnError::TransientDevice { .. }
            | SdnError::NotFound { .. } => true,
            SdnError::Store(e) => !e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true for outcomes that count as success for idempotence.
    pub fn is_success_equivalent(&self) -> bool {
        matches!(self, SdnError::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SdnError::Validation { .. } | SdnError::AlreadyOwned { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SdnError::NotFound { .. } => true,
            SdnError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Short event reason for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            SdnError::Validation { .. } => "ValidationFailed",
            SdnError::Connectivity { .. } => "Unreachable",
            SdnError::TransientDevice { .. } => "DeviceCallFailed",
            SdnError::Conflict { .. } => "AlreadyExists",
            SdnError::NotFound { .. } => "NotFound",
            SdnError::AlreadyOwned { .. } => "AlreadyOwned",
            SdnError::Store(_) => "StoreError",
            SdnError::InvalidConfig { .. } => "InvalidConfig",
            SdnError::Internal { .. } => "InternalError",
        }
    }
}

impl From<SdnError> for TaskError {
    fn from(err: SdnError) -> Self {
        let message = err.to_string();
        match err {
            SdnError::Validation { .. }
            | SdnError::AlreadyOwned { .. }
            | SdnError::InvalidConfig { .. } => TaskError::validation(message),
            SdnError::Connectivity { .. } => TaskError::connectivity(message),
            SdnError::TransientDevice { .. } => TaskError::transient(message),
            SdnError::Conflict { .. } => TaskError::conflict(message),
            SdnError::NotFound { .. } | SdnError::Store(_) => TaskError::need_retry(message),
            SdnError::Internal { .. } => TaskError::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdn_reconcile::TaskStatus;

    #[test]
    fn test_error_display() {
        let err = SdnError::validation("ethernet1.leaf1", "vlan 7 not present on switch");
        assert_eq!(
            err.to_string(),
            "Validation failed for ethernet1.leaf1: vlan 7 not present on switch"
        );
    }

    #[test]
    fn test_transient_error() {
        let err = SdnError::transient("leaf1", "update_vlan", "timeout");
        assert_eq!(err.to_string(), "Device call update_vlan on 'leaf1' failed: timeout");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_retryable() {
        assert!(SdnError::connectivity("leaf1", "refused").is_retryable());
        assert!(!SdnError::validation("x", "bad").is_retryable());
        assert!(!SdnError::internal("bug").is_retryable());
        assert!(SdnError::conflict("po10.leaf1", "exists").is_success_equivalent());
    }

    #[test]
    fn test_task_error_mapping() {
        let cases = [
            (SdnError::validation("x", "bad"), TaskStatus::Invalid),
            (SdnError::already_owned("x", "node-a"), TaskStatus::Invalid),
            (SdnError::connectivity("leaf1", "down"), TaskStatus::Unreachable),
            (SdnError::transient("leaf1", "op", "io"), TaskStatus::Failed),
            (SdnError::conflict("po1", "exists"), TaskStatus::Conflict),
            (SdnError::not_found("switch", "leaf9"), TaskStatus::NeedRetry),
        ];
        for (err, status) in cases {
            assert_eq!(TaskError::from(err).to_status(), status);
        }
    }

    #[test]
    fn test_store_error_conversion() {
        let err: SdnError = StoreError::not_found("switchport", "k").into();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }
}
