//! Per-container signature attestation

use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::VerificationCache;
use crate::errors::Result;
use crate::policy::{AllowList, SkipList};
use crate::selectors::{SelectorExtractor, SelectorRecord};
use crate::signature::Signature;
use crate::verifier::{ImageVerifier, ManifestFetcher, SignatureVerifier};

/// Emitted after every signature record that survives extraction
pub use podwarden_config::sigstore::SIGSTORE_VALIDATION_PASSED as VALIDATION_PASSED_SELECTOR;

/// Image facts of one running container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerImage {
    pub container_id: String,
    /// Image name as written in the pod spec
    pub image: String,
    /// Digest qualified image reference reported by the runtime
    pub image_id: String,
}

/// Verifies container images and renders signature selectors.
///
/// Owns the skip-list, allow-list and verification cache shared by its
/// verifier and extractor.
#[derive(Debug)]
pub struct AttestationPipeline {
    skip_list: Arc<SkipList>,
    allow_list: Arc<AllowList>,
    verifier: SignatureVerifier,
    extractor: SelectorExtractor,
    skipped_image_selectors: RwLock<Vec<String>>,
}

impl AttestationPipeline {
    pub fn new(
        cache_capacity: usize,
        fetcher: Arc<dyn ManifestFetcher>,
        backend: Arc<dyn ImageVerifier>,
    ) -> Result<Self> {
        let skip_list = Arc::new(SkipList::new());
        let allow_list = Arc::new(AllowList::new());
        let cache = Arc::new(VerificationCache::new(cache_capacity));
        let verifier = SignatureVerifier::new(skip_list.clone(), cache, fetcher, backend)?;
        Ok(Self {
            extractor: SelectorExtractor::new(allow_list.clone()),
            skip_list,
            allow_list,
            verifier,
            skipped_image_selectors: RwLock::new(vec![VALIDATION_PASSED_SELECTOR.to_string()]),
        })
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn extractor(&self) -> &SelectorExtractor {
        &self.extractor
    }

    /// Selectors for `container`, or the skipped-image selectors when its image is exempt.
    pub async fn attest_signatures(
        &self,
        container: &ContainerImage,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        if self.should_skip(&container.image_id)? {
            debug!(image_id = %container.image_id, "Skipping signature verification");
            return Ok(self.skipped_image_selectors.read().clone());
        }

        let signatures = self
            .verifier
            .fetch_signatures(&container.image_id, cancel)
            .await?;
        let records = self.selector_records(&signatures, &container.container_id);

        let mut selectors = Vec::new();
        for record in &records {
            selectors.extend(record.to_selector_values(&container.container_id));
            selectors.push(VALIDATION_PASSED_SELECTOR.to_string());
        }
        debug!(
            container_id = %container.container_id,
            signatures = signatures.len(),
            records = records.len(),
            "Signature selectors extracted"
        );
        Ok(selectors)
    }

    fn selector_records(
        &self,
        signatures: &[Arc<dyn Signature>],
        container_id: &str,
    ) -> Vec<SelectorRecord> {
        let records = self.extractor.extract_selectors(signatures, container_id);
        self.extractor.apply_allow_list(records)
    }

    /// Errors on an empty image ID; an unknown ID is simply not skipped.
    pub fn should_skip(&self, image_id: &str) -> Result<bool> {
        self.skip_list.should_skip(image_id)
    }

    pub fn add_skipped_images<I, S>(&self, images: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_list.add(images);
    }

    pub fn clear_skip_list(&self) {
        self.skip_list.clear();
    }

    pub fn set_skipped_image_selectors(&self, selectors: Vec<String>) {
        *self.skipped_image_selectors.write() = selectors;
    }

    pub fn enable_allowed_subjects(&self, enabled: bool) {
        self.allow_list.set_enabled(enabled);
    }

    pub fn add_allowed_subject(&self, subject: impl Into<String>) {
        self.allow_list.add(subject);
    }

    pub fn clear_allowed_subjects(&self) {
        self.allow_list.clear();
    }

    pub fn is_subject_allowed(&self, subject: &str) -> bool {
        self.allow_list.permits(subject)
    }

    pub fn set_rekor_url(&self, url: &str) -> Result<()> {
        self.verifier.set_rekor_url(url)
    }

    /// DER encoded Fulcio roots for certificate based signatures
    pub fn set_root_certificates(&self, roots: Vec<Vec<u8>>) {
        self.verifier.set_root_certificates(roots)
    }

    /// Drop every cached verification result
    pub fn evict_cache(&self) {
        info!("Evicting cached signature verification results");
        self.verifier.cache().evict_all();
    }
}
