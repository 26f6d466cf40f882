//! Error taxonomy shared by the mirror and relay state machines.

use crate::ports::{PlatformError, VcsError};

/// Coarse error classes an operator can alert on.
///
/// Each class maps to a distinct process exit code so that "known bad state,
/// reported" can be told apart from "system malfunction, investigate".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Contradictory or missing inputs, detected before any I/O.
    Configuration,
    /// A VCS or platform operation failed unexpectedly.
    Transport,
    /// An expected bad outcome that was (or could not be) reported as a status.
    Reportable,
    /// Malformed environment or setup, or a status the sink refused.
    Internal,
}

impl ErrorClass {
    /// Process exit code for this class.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Reportable => 1,
            ErrorClass::Configuration => 2,
            ErrorClass::Transport | ErrorClass::Internal => 3,
        }
    }
}

/// Errors produced by the branch mirror and status relay.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("git {operation} failed: {source}")]
    Vcs {
        operation: &'static str,
        #[source]
        source: VcsError,
    },

    #[error("{operation} failed: {source}")]
    Platform {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("status for {sha} rejected by sink with HTTP {code}")]
    StatusRejected { sha: String, code: u16 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn vcs(operation: &'static str) -> impl FnOnce(VcsError) -> BridgeError {
        move |source| BridgeError::Vcs { operation, source }
    }

    pub fn platform(operation: &'static str) -> impl FnOnce(PlatformError) -> BridgeError {
        move |source| BridgeError::Platform { operation, source }
    }

    /// The operator-facing class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::Configuration(_) => ErrorClass::Configuration,
            BridgeError::Vcs { .. } | BridgeError::Platform { .. } => ErrorClass::Transport,
            BridgeError::ReferenceNotFound(_) => ErrorClass::Reportable,
            BridgeError::StatusRejected { .. } | BridgeError::Internal(_) | BridgeError::Io(_) => {
                ErrorClass::Internal
            }
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = BridgeError::Configuration("both --ref and --pull-request".to_string());
        assert_eq!(err.class(), ErrorClass::Configuration);

        let err = BridgeError::vcs("fetch")(VcsError::CommandFailed {
            command: "fetch".to_string(),
            stderr: "fatal: couldn't find remote ref".to_string(),
        });
        assert_eq!(err.class(), ErrorClass::Transport);
        assert!(err.to_string().contains("git fetch failed"));

        let err = BridgeError::ReferenceNotFound("pr-42".to_string());
        assert_eq!(err.class(), ErrorClass::Reportable);

        let err = BridgeError::StatusRejected {
            sha: "def456".to_string(),
            code: 422,
        };
        assert_eq!(err.class(), ErrorClass::Internal);
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        assert_eq!(ErrorClass::Reportable.exit_code(), 1);
        assert_eq!(ErrorClass::Configuration.exit_code(), 2);
        assert_eq!(ErrorClass::Transport.exit_code(), 3);
        assert_ne!(
            ErrorClass::Reportable.exit_code(),
            ErrorClass::Internal.exit_code()
        );
    }
}
