//! Image signature fetching and verification

use async_trait::async_trait;
use oci_distribution::Reference;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CachedSignatures, VerificationCache};
use crate::errors::{BoxError, Result, SigstoreError};
use crate::policy::SkipList;
use crate::signature::Signature;

pub use podwarden_config::sigstore::DEFAULT_REKOR_URL;

/// Fetches an image manifest from its registry
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Raw manifest bytes. An empty vector means no manifest exists.
    async fn fetch_manifest(&self, reference: &Reference) -> std::result::Result<Vec<u8>, BoxError>;
}

/// Verifies the signatures attached to an image
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn verify(
        &self,
        reference: &Reference,
        options: &CheckOptions,
    ) -> std::result::Result<VerifiedSignatures, VerifyFailure>;
}

/// Successful verification result
#[derive(Debug, Clone, Default)]
pub struct VerifiedSignatures {
    pub signatures: Vec<Arc<dyn Signature>>,
    /// Whether the transparency log bundle was verified
    pub bundle_verified: bool,
}

/// Verification failure, possibly alongside signatures that were checked before the failure
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct VerifyFailure {
    pub message: String,
    pub signatures: Vec<Arc<dyn Signature>>,
}

impl VerifyFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            signatures: Vec::new(),
        }
    }

    pub fn with_signatures(mut self, signatures: Vec<Arc<dyn Signature>>) -> Self {
        self.signatures = signatures;
        self
    }
}

/// Inputs handed to the verification backend
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub rekor_url: Url,
    /// HTTP client for transparency log lookups
    pub rekor_client: reqwest::Client,
    /// DER encoded Fulcio roots; empty disables certificate chain checks
    pub root_certificates: Vec<Vec<u8>>,
}

/// Parse a container image reference, dropping any runtime scheme such as `docker-pullable://`.
pub fn parse_image_reference(image: &str) -> Result<Reference> {
    let trimmed = image
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(image);
    trimmed
        .parse::<Reference>()
        .map_err(|e| SigstoreError::InvalidReference {
            reference: image.to_string(),
            reason: e.to_string(),
        })
}

/// Validate a transparency log URL. Only absolute http(s) URLs with a host are accepted.
pub fn parse_rekor_url(raw: &str) -> Result<Url> {
    if raw.is_empty() {
        return Err(SigstoreError::InvalidRekorUrl("rekor URL is empty".into()));
    }
    let url = Url::parse(raw)
        .map_err(|_| SigstoreError::InvalidRekorUrl("failed parsing rekor URI".into()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SigstoreError::InvalidRekorUrl("invalid rekor URL Host".into()));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SigstoreError::InvalidRekorUrl("invalid rekor URL Scheme".into()));
    }
    Ok(url)
}

/// Fetches and verifies image signatures, honouring the skip-list and cache
pub struct SignatureVerifier {
    skip_list: Arc<SkipList>,
    cache: Arc<VerificationCache>,
    fetcher: Arc<dyn ManifestFetcher>,
    backend: Arc<dyn ImageVerifier>,
    rekor_url: RwLock<Url>,
    rekor_client: reqwest::Client,
    root_certificates: RwLock<Vec<Vec<u8>>>,
}

impl SignatureVerifier {
    pub fn new(
        skip_list: Arc<SkipList>,
        cache: Arc<VerificationCache>,
        fetcher: Arc<dyn ManifestFetcher>,
        backend: Arc<dyn ImageVerifier>,
    ) -> Result<Self> {
        let rekor_client = reqwest::Client::builder()
            .user_agent(concat!("podwarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SigstoreError::ConfigError(format!("failed to build rekor client: {e}")))?;
        Ok(Self {
            skip_list,
            cache,
            fetcher,
            backend,
            rekor_url: RwLock::new(parse_rekor_url(DEFAULT_REKOR_URL)?),
            rekor_client,
            root_certificates: RwLock::new(Vec::new()),
        })
    }

    /// Replace the DER encoded Fulcio roots handed to the backend.
    pub fn set_root_certificates(&self, roots: Vec<Vec<u8>>) {
        info!(roots = roots.len(), "Using Fulcio roots");
        *self.root_certificates.write() = roots;
    }

    pub fn root_certificates(&self) -> Vec<Vec<u8>> {
        self.root_certificates.read().clone()
    }

    pub fn rekor_url(&self) -> Url {
        self.rekor_url.read().clone()
    }

    /// Replace the transparency log URL. The previous URL is kept on error.
    pub fn set_rekor_url(&self, raw: &str) -> Result<()> {
        let url = parse_rekor_url(raw)?;
        info!(rekor_url = %url, "Using transparency log");
        *self.rekor_url.write() = url;
        Ok(())
    }

    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    fn check_options(&self) -> CheckOptions {
        CheckOptions {
            rekor_url: self.rekor_url(),
            rekor_client: self.rekor_client.clone(),
            root_certificates: self.root_certificates(),
        }
    }

    /// Fetch the verified signatures for `image`.
    ///
    /// Skipped images return no signatures. Any verification failure discards
    /// whatever signatures the backend produced.
    pub async fn fetch_signatures(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedSignatures> {
        let reference = parse_image_reference(image)?;

        if self.skip_list.contains(image) {
            debug!(image, "Image is on the skip list");
            return Ok(Vec::new());
        }

        if let Some(cached) = self.cache.get(image) {
            debug!(image, signatures = cached.len(), "Using cached verification result");
            return Ok(cached);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SigstoreError::Cancelled),
            result = self.fetcher.fetch_manifest(&reference) => result,
        };
        let manifest = fetched.map_err(|e| SigstoreError::ManifestFetch {
            image: image.to_string(),
            reason: e.to_string(),
        })?;
        if manifest.is_empty() {
            return Err(SigstoreError::ManifestMissing(image.to_string()));
        }

        let options = self.check_options();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SigstoreError::Cancelled),
            result = self.backend.verify(&reference, &options) => result,
        };
        let verified = outcome.map_err(|failure| {
            if !failure.signatures.is_empty() {
                debug!(
                    image,
                    discarded = failure.signatures.len(),
                    "Discarding signatures returned with a verification error"
                );
            }
            SigstoreError::Verification(failure.message)
        })?;

        if !verified.bundle_verified {
            return Err(SigstoreError::BundleNotVerified(image.to_string()));
        }

        debug!(image, signatures = verified.signatures.len(), "Image signatures verified");
        self.cache.put(image, verified.signatures.clone());
        Ok(verified.signatures)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("rekor_url", &self.rekor_url())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
