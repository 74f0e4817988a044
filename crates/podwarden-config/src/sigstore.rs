use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";
pub const DEFAULT_CACHE_CAPACITY: usize = 10;
pub const SIGSTORE_VALIDATION_PASSED: &str = "sigstore-validation:passed";

/// Experimental feature toggles
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExperimentalConfig {
    /// Image signature attestation. Enabled when the table is present.
    pub sigstore: Option<SigstoreConfig>,
}

/// Image signature verification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SigstoreConfig {
    /// Image IDs that are never verified
    pub skip_signature_verification_image_list: Vec<String>,

    pub enable_allowed_subjects_list: bool,

    /// Signer subjects accepted when the allow list is enabled
    pub allowed_subjects_list: Vec<String>,

    /// Transparency log endpoint
    pub rekor_url: Option<String>,

    /// PEM bundle of Fulcio roots that signing certificates must chain to
    pub fulcio_roots_path: Option<PathBuf>,

    pub cache_capacity: usize,

    /// Selectors emitted for images on the skip list
    pub skipped_image_selectors: Vec<String>,
}

impl Default for SigstoreConfig {
    fn default() -> Self {
        Self {
            skip_signature_verification_image_list: Vec::new(),
            enable_allowed_subjects_list: false,
            allowed_subjects_list: Vec::new(),
            rekor_url: None,
            fulcio_roots_path: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            skipped_image_selectors: vec![SIGSTORE_VALIDATION_PASSED.to_string()],
        }
    }
}

impl SigstoreConfig {
    pub fn rekor_url(&self) -> &str {
        self.rekor_url.as_deref().unwrap_or(DEFAULT_REKOR_URL)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(anyhow!("sigstore cache_capacity must be greater than zero"));
        }
        Ok(())
    }
}
