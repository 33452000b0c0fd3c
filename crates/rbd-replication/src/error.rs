//! Error types for the replication control plane.
//!
//! Every handler failure is classified into one of the kinds below; the
//! kind decides the outbound gRPC status code and whether the caller is
//! expected to retry.

use thiserror::Error;
use tonic::{Code, Status};

/// Handler-level failures, one variant per outbound error kind.
#[derive(Debug, Error)]
pub enum ReplError {
    /// Malformed request or unsupported parameter. Not retried.
    #[error("{msg}")]
    Validation {
        /// User-facing diagnostic.
        msg: String,
    },

    /// Image or pool absent.
    #[error("{msg}")]
    NotFound {
        /// User-facing diagnostic.
        msg: String,
    },

    /// Another operation is in flight for the same volume. Retried by the caller.
    #[error("operation already exists for volume {volume_id}")]
    Contention {
        /// Volume that is already being operated on.
        volume_id: String,
    },

    /// Image is mid-transition (disabling, being recreated). Retried by the caller.
    #[error("{msg}")]
    TransitionalState {
        /// User-facing diagnostic.
        msg: String,
    },

    /// A resync was issued and the initial data has not been synced yet.
    #[error("{msg}")]
    AwaitingResync {
        /// User-facing diagnostic.
        msg: String,
    },

    /// Promotion refused because the peer is unreachable; retry with force.
    #[error("{msg}")]
    PreconditionRequiresForce {
        /// User-facing diagnostic.
        msg: String,
    },

    /// Anything else, including remote errors matching no other kind.
    #[error("{msg}")]
    Internal {
        /// User-facing diagnostic.
        msg: String,
    },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,
}

impl ReplError {
    /// Builds a [`ReplError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { msg: msg.into() }
    }

    /// Builds a [`ReplError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound { msg: msg.into() }
    }

    /// Builds a [`ReplError::TransitionalState`].
    pub fn transitional(msg: impl Into<String>) -> Self {
        Self::TransitionalState { msg: msg.into() }
    }

    /// Builds a [`ReplError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { msg: msg.into() }
    }

    /// gRPC status code for this error kind.
    pub fn code(&self) -> Code {
        match self {
            Self::Validation { .. } => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::Contention { .. } | Self::TransitionalState { .. } => Code::Aborted,
            Self::AwaitingResync { .. } => Code::Unavailable,
            Self::PreconditionRequiresForce { .. } => Code::FailedPrecondition,
            Self::Internal { .. } => Code::Internal,
            Self::Cancelled => Code::Cancelled,
        }
    }

    /// Whether the caller is expected to retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. }
                | Self::TransitionalState { .. }
                | Self::AwaitingResync { .. }
                | Self::PreconditionRequiresForce { .. }
        )
    }
}

impl From<ReplError> for Status {
    fn from(e: ReplError) -> Self {
        Status::new(e.code(), e.to_string())
    }
}

/// Result type for replication handlers.
pub type Result<T, E = ReplError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_message_and_code() {
        let e = ReplError::Contention {
            volume_id: "vol-1".to_string(),
        };
        assert_eq!(e.to_string(), "operation already exists for volume vol-1");
        assert_eq!(e.code(), Code::Aborted);
        assert!(e.is_retryable());
    }

    #[test]
    fn test_status_conversion_keeps_message() {
        let status: Status = ReplError::AwaitingResync {
            msg: "awaiting initial resync due to split brain".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "awaiting initial resync due to split brain");
    }

    #[test]
    fn test_kind_to_code_mapping() {
        assert_eq!(ReplError::validation("x").code(), Code::InvalidArgument);
        assert_eq!(ReplError::not_found("x").code(), Code::NotFound);
        assert_eq!(ReplError::transitional("x").code(), Code::Aborted);
        assert_eq!(ReplError::internal("x").code(), Code::Internal);
        assert_eq!(
            ReplError::PreconditionRequiresForce {
                msg: "busy".to_string()
            }
            .code(),
            Code::FailedPrecondition
        );
        assert_eq!(ReplError::Cancelled.code(), Code::Cancelled);
    }

    #[test]
    fn test_validation_and_internal_are_not_retryable() {
        assert!(!ReplError::validation("bad").is_retryable());
        assert!(!ReplError::internal("boom").is_retryable());
        assert!(!ReplError::not_found("gone").is_retryable());
    }
}
