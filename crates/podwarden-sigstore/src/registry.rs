//! Anonymous OCI registry manifest fetcher

use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use tracing::debug;

use crate::errors::BoxError;
use crate::verifier::ManifestFetcher;

/// Pulls image manifests over the OCI distribution API
pub struct RegistryManifestFetcher {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryManifestFetcher {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            client: Client::new(config),
            auth: RegistryAuth::Anonymous,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = RegistryAuth::Basic(username.into(), password.into());
        self
    }
}

impl Default for RegistryManifestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestFetcher for RegistryManifestFetcher {
    async fn fetch_manifest(&self, reference: &Reference) -> Result<Vec<u8>, BoxError> {
        let (manifest, digest) = self
            .client
            .pull_manifest(reference, &self.auth)
            .await
            .map_err(|e| format!("Cannot pull manifest for image {}: {}", reference.whole(), e))?;
        debug!(image = %reference.whole(), %digest, "Fetched image manifest");
        Ok(serde_json::to_vec(&manifest)?)
    }
}
