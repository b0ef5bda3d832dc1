//! Error types for onto-rs.

use thiserror::Error;

use crate::arms::ArmId;
use crate::context::ContextHandle;

/// Errors that can occur while configuring the advisor or selecting plans.
#[derive(Debug, Error)]
pub enum OntoError {
    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The arm id has no technique profile.
    #[error("no technique profile for arm {0}")]
    UnknownArm(ArmId),

    /// The host optimizer failed to produce a plan for one arm.
    #[error("optimizer failed for {arm}: {reason}")]
    Optimizer {
        /// Arm being planned ("host default" for the current switches)
        arm: String,
        /// Host-provided failure description
        reason: String,
    },

    /// Every candidate arm failed to produce a plan.
    #[error("no candidate plan could be generated")]
    NoCandidates,

    /// Connecting to, writing to, or reading from the learning service failed.
    #[error("learning service I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The learning service did not answer within the configured timeout.
    #[error("learning service timed out after {0}ms")]
    Timeout(u64),

    /// The exchange was cancelled through its cancellation token.
    #[error("learning service exchange cancelled")]
    Cancelled,

    /// The learning service closed the connection before a full response.
    #[error("short response from learning service: expected {expected} bytes")]
    ShortResponse {
        /// Number of bytes the exchange requires
        expected: usize,
    },

    /// The learning service chose an arm outside the configured range.
    #[error("learning service returned arm index {index}, outside 0..{num_arms}")]
    ArmOutOfRange {
        /// Raw index returned by the service
        index: u32,
        /// Number of arms that were offered
        num_arms: usize,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request context was already taken by another consumer.
    #[error("request context {0} already consumed")]
    ContextConsumed(ContextHandle),

    /// The context was evicted from the full registry before anyone took it.
    #[error("request context {0} was evicted before it was taken")]
    ContextEvicted(ContextHandle),

    /// The handle was never issued by this registry.
    #[error("unknown request context {0}")]
    UnknownContext(ContextHandle),

    /// The advisor is disabled by configuration.
    #[error("plan advisor is disabled")]
    Disabled,
}

impl OntoError {
    /// Whether the caller can fall back to the host default plan (or drop a
    /// reward) and carry on.
    ///
    /// Double consumption of a request context is an internal invariant
    /// violation and is the only non-recoverable runtime error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            OntoError::ContextConsumed(_)
                | OntoError::InvalidConfig(_)
                | OntoError::Config(_)
        )
    }
}

/// Result type alias for onto operations.
pub type Result<T> = std::result::Result<T, OntoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(OntoError::Timeout(10).is_recoverable());
        assert!(OntoError::ShortResponse { expected: 4 }.is_recoverable());
        assert!(OntoError::ArmOutOfRange {
            index: 40,
            num_arms: 6
        }
        .is_recoverable());
        assert!(OntoError::NoCandidates.is_recoverable());

        let handle = ContextHandle::from_raw(7).unwrap();
        assert!(!OntoError::ContextConsumed(handle).is_recoverable());
        assert!(OntoError::ContextEvicted(handle).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = OntoError::ArmOutOfRange {
            index: 40,
            num_arms: 6,
        };
        assert_eq!(
            err.to_string(),
            "learning service returned arm index 40, outside 0..6"
        );
        assert_eq!(
            OntoError::UnknownArm(ArmId::new(6)).to_string(),
            "no technique profile for arm 6"
        );
    }
}
