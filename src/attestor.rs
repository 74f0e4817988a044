//! Kubernetes workload attestor
//!
//! Maps a process ID to its pod and container through the kubelet and
//! renders `k8s` selectors for it, optionally adding image signature
//! selectors from the sigstore pipeline.

use podwarden_config::{Config, SigstoreConfig};
use podwarden_sigstore::{
    AttestationPipeline, ContainerImage, ImageVerifier, ManifestFetcher, SigstoreError,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cgroup::{ContainerIdResolver, ProcCgroupResolver};
use crate::clock::{Clock, SystemClock};
use crate::error::{AttestorError, Result};
use crate::kubelet::{spawn_reload, ClientHandle, KubeletMode, TrustConfig};
use crate::locator::locate;
use crate::pods::ContainerStatus;
use crate::scheduler::PollScheduler;
use crate::selector::Selector;

/// Environment variable lookup used for the node name
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Registry access and signature verification for the sigstore pipeline
#[derive(Clone)]
pub struct SigstoreBackend {
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub verifier: Arc<dyn ImageVerifier>,
}

impl SigstoreBackend {
    pub fn new(fetcher: Arc<dyn ManifestFetcher>, verifier: Arc<dyn ImageVerifier>) -> Self {
        Self { fetcher, verifier }
    }

    /// Anonymous registry access with cosign verification
    #[cfg(feature = "cosign")]
    pub fn cosign() -> Self {
        Self::new(
            Arc::new(podwarden_sigstore::RegistryManifestFetcher::new()),
            Arc::new(podwarden_sigstore::CosignVerifier::new()),
        )
    }
}

/// Collaborators of the attestor that tests replace
#[derive(Clone)]
pub struct AttestorDeps {
    pub clock: Arc<dyn Clock>,
    pub resolver: Arc<dyn ContainerIdResolver>,
    pub env: EnvLookup,
    pub sigstore: Option<SigstoreBackend>,
}

impl AttestorDeps {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            resolver: Arc::new(ProcCgroupResolver::default()),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
            sigstore: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContainerIdResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn with_sigstore(mut self, backend: SigstoreBackend) -> Self {
        self.sigstore = Some(backend);
        self
    }
}

impl Default for AttestorDeps {
    fn default() -> Self {
        Self::new()
    }
}

pub struct K8sAttestor {
    trust: TrustConfig,
    client: Arc<ClientHandle>,
    scheduler: PollScheduler,
    resolver: Arc<dyn ContainerIdResolver>,
    disable_container_selectors: bool,
    sigstore: Option<AttestationPipeline>,
    reload: CancellationToken,
}

impl K8sAttestor {
    /// Validates `config`, builds the first kubelet client and starts the
    /// credential reload task. Must be called from within a tokio runtime.
    pub fn configure(config: &Config, deps: AttestorDeps) -> Result<Self> {
        config.validate()?;
        let kubelet = &config.kubelet;

        let trust = TrustConfig::from_config(kubelet, &*deps.env)?;
        let scheduler = PollScheduler::new(
            deps.clock.clone(),
            kubelet.max_poll_attempts(),
            kubelet.poll_retry_interval()?,
        );
        let reload_interval = kubelet.reload_interval()?;
        let sigstore = match &config.experimental.sigstore {
            Some(sigstore) => Some(build_pipeline(sigstore, deps.sigstore.clone())?),
            None => None,
        };
        let runtime = Handle::try_current()
            .map_err(|e| AttestorError::config_with("a tokio runtime is required", e))?;

        let client = Arc::new(ClientHandle::new(trust.build_client()?));
        let reload = CancellationToken::new();
        if matches!(trust.mode(), KubeletMode::Secure(_)) {
            spawn_reload(
                &runtime,
                trust.clone(),
                client.clone(),
                deps.clock.clone(),
                reload_interval,
                reload.clone(),
            );
        }

        info!(
            kubelet_url = %trust.url(),
            mode = %trust,
            max_poll_attempts = scheduler.max_attempts(),
            poll_retry_interval = ?scheduler.retry_interval(),
            sigstore = sigstore.is_some(),
            "Configured kubelet workload attestor"
        );

        Ok(Self {
            trust,
            client,
            scheduler,
            resolver: deps.resolver,
            disable_container_selectors: kubelet.disable_container_selectors,
            sigstore,
            reload,
        })
    }

    /// Selectors for the workload running as `pid`.
    ///
    /// A process outside any pod yields no selectors and no kubelet query.
    pub async fn attest(&self, pid: u32, cancel: &CancellationToken) -> Result<Vec<Selector>> {
        let Some(identity) = self.resolver.resolve(pid)? else {
            debug!(pid, "Process is not running in a pod");
            return Ok(Vec::new());
        };

        let found = self
            .scheduler
            .run(cancel, |attempt| {
                let client = self.client.current();
                let identity = &identity;
                async move {
                    debug!(pid, attempt, container_id = %identity.container_id, "Looking up container");
                    locate(&client, identity).await
                }
            })
            .await?;

        let mut values = found.pod_selectors;
        if !self.disable_container_selectors {
            values.extend(found.container_selectors);
            if let Some(pipeline) = &self.sigstore {
                values.extend(signature_selectors(pipeline, &found.status, cancel).await?);
            }
        }

        info!(
            pid,
            container_id = %identity.container_id,
            selectors = values.len(),
            "Attested workload"
        );
        Ok(values.into_iter().map(Selector::k8s).collect())
    }

    pub fn kubelet_url(&self) -> &Url {
        self.trust.url()
    }

    pub fn trust(&self) -> &TrustConfig {
        &self.trust
    }

    /// Bumped every time reload swaps in a new kubelet client
    pub fn credential_generation(&self) -> u64 {
        self.client.generation()
    }

    pub fn sigstore(&self) -> Option<&AttestationPipeline> {
        self.sigstore.as_ref()
    }

    pub fn set_rekor_url(&self, url: &str) -> Result<()> {
        let pipeline = self
            .sigstore
            .as_ref()
            .ok_or_else(|| AttestorError::config("sigstore verification is not enabled"))?;
        pipeline
            .set_rekor_url(url)
            .map_err(|e| AttestorError::config_with("failed to parse Rekor URL", e))
    }

    /// Stops the credential reload task
    pub fn shutdown(&self) {
        self.reload.cancel();
    }
}

impl Drop for K8sAttestor {
    fn drop(&mut self) {
        self.reload.cancel();
    }
}

impl fmt::Debug for K8sAttestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("K8sAttestor")
            .field("trust", &self.trust)
            .field("scheduler", &self.scheduler)
            .field("disable_container_selectors", &self.disable_container_selectors)
            .field("sigstore", &self.sigstore.is_some())
            .finish_non_exhaustive()
    }
}

/// Signature selectors for one container. Pipeline failures are logged and
/// yield nothing; cancellation is still reported.
async fn signature_selectors(
    pipeline: &AttestationPipeline,
    status: &ContainerStatus,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let container = ContainerImage {
        container_id: status.container_id.clone(),
        image: status.image.clone(),
        image_id: status.image_id.clone(),
    };
    match pipeline.attest_signatures(&container, cancel).await {
        Ok(selectors) => Ok(selectors),
        Err(SigstoreError::Cancelled) => Err(AttestorError::Cancelled),
        Err(e) => {
            warn!(
                error = %e,
                container_id = %status.container_id,
                image = %status.image_id,
                "Error retrieving signature payload"
            );
            Ok(Vec::new())
        }
    }
}

fn build_pipeline(
    config: &SigstoreConfig,
    backend: Option<SigstoreBackend>,
) -> Result<AttestationPipeline> {
    let backend = match backend {
        Some(backend) => backend,
        None => default_backend()?,
    };
    let pipeline = AttestationPipeline::new(config.cache_capacity, backend.fetcher, backend.verifier)?;
    pipeline
        .set_rekor_url(config.rekor_url())
        .map_err(|e| AttestorError::config_with("failed to parse Rekor URL", e))?;
    if let Some(path) = &config.fulcio_roots_path {
        pipeline.set_root_certificates(load_fulcio_roots(path)?);
    }
    pipeline.add_skipped_images(config.skip_signature_verification_image_list.iter().cloned());
    pipeline.set_skipped_image_selectors(config.skipped_image_selectors.clone());
    pipeline.enable_allowed_subjects(config.enable_allowed_subjects_list);
    for subject in &config.allowed_subjects_list {
        pipeline.add_allowed_subject(subject.clone());
    }
    Ok(pipeline)
}

fn load_fulcio_roots(path: &Path) -> Result<Vec<Vec<u8>>> {
    let pem = std::fs::read(path)
        .map_err(|e| AttestorError::config_with("unable to load Fulcio roots", e))?;
    let roots = CertificateDer::pem_slice_iter(&pem)
        .map(|cert| cert.map(|cert| cert.to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AttestorError::config_with("unable to parse Fulcio roots", e))?;
    if roots.is_empty() {
        return Err(AttestorError::config("unable to parse Fulcio roots: no certificates found"));
    }
    Ok(roots)
}

#[cfg(feature = "cosign")]
fn default_backend() -> Result<SigstoreBackend> {
    Ok(SigstoreBackend::cosign())
}

#[cfg(not(feature = "cosign"))]
fn default_backend() -> Result<SigstoreBackend> {
    Err(AttestorError::config(
        "sigstore verification needs a verification backend; rebuild with the cosign feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwarden_config::ConfigBuilder;

    #[cfg(not(feature = "cosign"))]
    #[tokio::test]
    async fn test_sigstore_without_backend_is_rejected() {
        let config = ConfigBuilder::new()
            .with_read_only_port(10255)
            .with_sigstore(SigstoreConfig::default())
            .build();
        let err = K8sAttestor::configure(&config, AttestorDeps::new()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_configure_outside_runtime_fails() {
        let config = ConfigBuilder::new().with_read_only_port(10255).build();
        let err = K8sAttestor::configure(&config, AttestorDeps::new()).unwrap_err();
        assert!(err.to_string().starts_with("a tokio runtime is required"));
    }

    #[tokio::test]
    async fn test_set_rekor_url_requires_sigstore() {
        let config = ConfigBuilder::new().with_read_only_port(10255).build();
        let attestor = K8sAttestor::configure(&config, AttestorDeps::new()).unwrap();
        let err = attestor.set_rekor_url("https://rekor.example.com").unwrap_err();
        assert_eq!(err.to_string(), "sigstore verification is not enabled");
    }
}
