//! Error types for image signature attestation

use thiserror::Error;

/// Boxed error returned by registry and verification backends
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Signature attestation errors
#[derive(Error, Debug)]
pub enum SigstoreError {
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("image ID cannot be empty")]
    EmptyImageId,

    #[error("error fetching image manifest for {image:?}: {reason}")]
    ManifestFetch { image: String, reason: String },

    #[error("no manifest found for image {0:?}")]
    ManifestMissing(String),

    #[error("error verifying signature: {0}")]
    Verification(String),

    #[error("bundle not verified for image {0:?}")]
    BundleNotVerified(String),

    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    /// Rejected transparency log URL; the message is the bare cause
    #[error("{0}")]
    InvalidRekorUrl(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("context canceled")]
    Cancelled,
}

/// Result type for signature attestation operations
pub type Result<T> = std::result::Result<T, SigstoreError>;

impl SigstoreError {
    /// Errors caused by caller input rather than by a remote service
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            SigstoreError::InvalidReference { .. }
                | SigstoreError::EmptyImageId
                | SigstoreError::InvalidRekorUrl(_)
                | SigstoreError::ConfigError(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SigstoreError::Cancelled)
    }
}
