//! Error types for the workload attestor

use podwarden_sigstore::SigstoreError;
use std::fmt;
use thiserror::Error;

/// Status class reported to the attestor's host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    Internal,
    DeadlineExceeded,
    Cancelled,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::Internal => "Internal",
            ErrorCode::DeadlineExceeded => "DeadlineExceeded",
            ErrorCode::Cancelled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Attestation errors
#[derive(Error, Debug)]
pub enum AttestorError {
    /// Rejected configuration or credential material
    #[error("{0}")]
    Config(String),

    /// Kubelet request failed at the transport, TLS or HTTP layer
    #[error("{0}")]
    Kubelet(String),

    /// The container ID of a process could not be determined
    #[error("unable to resolve container for pid {pid}: {reason}")]
    ContainerLookup { pid: u32, reason: String },

    #[error("no selectors found after max poll attempts")]
    PollAttemptsExhausted,

    #[error("context canceled")]
    Cancelled,

    #[error(transparent)]
    Sigstore(#[from] SigstoreError),
}

/// Result type for attestor operations
pub type Result<T> = std::result::Result<T, AttestorError>;

impl AttestorError {
    pub fn config(message: impl Into<String>) -> Self {
        AttestorError::Config(message.into())
    }

    /// Config error prefixed with `context`, keeping the cause chain
    pub fn config_with(context: &str, cause: impl fmt::Display) -> Self {
        AttestorError::Config(format!("{context}: {cause}"))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AttestorError::Config(_) => ErrorCode::InvalidArgument,
            AttestorError::Kubelet(_) | AttestorError::ContainerLookup { .. } => ErrorCode::Internal,
            AttestorError::PollAttemptsExhausted => ErrorCode::DeadlineExceeded,
            AttestorError::Cancelled => ErrorCode::Cancelled,
            AttestorError::Sigstore(err) if err.is_cancelled() => ErrorCode::Cancelled,
            AttestorError::Sigstore(err) if err.is_invalid_argument() => ErrorCode::InvalidArgument,
            AttestorError::Sigstore(_) => ErrorCode::Internal,
        }
    }
}

impl From<anyhow::Error> for AttestorError {
    fn from(err: anyhow::Error) -> Self {
        AttestorError::Config(format!("{err:#}"))
    }
}
