//! Cosign backed verification using the sigstore crate
//!
//! The cosign client trusts the public key served by the configured Rekor
//! instance and the configured Fulcio roots. It is rebuilt whenever the Rekor
//! URL or the roots change.

use async_trait::async_trait;
use oci_distribution::Reference;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, SubjectPublicKeyInfoDer};
use sigstore::cosign::signature_layers::{CertificateSubject, SignatureLayer};
use sigstore::cosign::{Client as CosignClient, ClientBuilder, CosignCapabilities};
use sigstore::registry::{Auth, OciReference};
use sigstore::trust::ManualTrustRoot;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::signature::{
    BundleSignature, CertificateSignature, PlainSignature, RekorBundle, RekorPayload, Signature,
    SigningCertificate,
};
use crate::verifier::{CheckOptions, ImageVerifier, VerifiedSignatures, VerifyFailure};

const REKOR_PUBLIC_KEY_PATH: &str = "api/v1/log/publicKey";

/// [`ImageVerifier`] built on cosign trusted signature layers
pub struct CosignVerifier {
    trusted: Mutex<Option<TrustedClient>>,
    auth: Auth,
}

impl CosignVerifier {
    /// Anonymous registry access. The client is built on first use.
    pub fn new() -> Self {
        Self {
            trusted: Mutex::new(None),
            auth: Auth::Anonymous,
        }
    }
}

impl Default for CosignVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosign client together with the trust material it was built from
struct TrustedClient {
    rekor_url: Url,
    root_certificates: Vec<Vec<u8>>,
    client: CosignClient,
}

impl TrustedClient {
    async fn build(options: &CheckOptions) -> Result<Self, VerifyFailure> {
        let rekor_key = fetch_rekor_key(&options.rekor_client, &options.rekor_url).await?;
        let trust_root = ManualTrustRoot {
            fulcio_certs: options
                .root_certificates
                .iter()
                .map(|der| CertificateDer::from(der.as_slice()))
                .collect(),
            rekor_keys: vec![rekor_key],
            ctfe_keys: Vec::new(),
        };
        let client = ClientBuilder::default()
            .with_trust_repository(&trust_root)
            .and_then(|builder| builder.build())
            .map_err(|e| VerifyFailure::new(format!("Cannot build cosign client: {e}")))?;

        info!(
            rekor_url = %options.rekor_url,
            fulcio_roots = options.root_certificates.len(),
            "Cosign client configured"
        );
        Ok(Self {
            rekor_url: options.rekor_url.clone(),
            root_certificates: options.root_certificates.clone(),
            client,
        })
    }

    fn serves(&self, options: &CheckOptions) -> bool {
        self.rekor_url == options.rekor_url && self.root_certificates == options.root_certificates
    }
}

/// Fetch the transparency log's public key and return it as SPKI DER.
async fn fetch_rekor_key(client: &reqwest::Client, rekor_url: &Url) -> Result<Vec<u8>, VerifyFailure> {
    let endpoint = format!(
        "{}/{REKOR_PUBLIC_KEY_PATH}",
        rekor_url.as_str().trim_end_matches('/')
    );
    let response = client
        .get(&endpoint)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| VerifyFailure::new(format!("Cannot fetch Rekor public key: {e}")))?;
    let pem = response
        .bytes()
        .await
        .map_err(|e| VerifyFailure::new(format!("Cannot fetch Rekor public key: {e}")))?;
    let key = SubjectPublicKeyInfoDer::from_pem_slice(&pem)
        .map_err(|e| VerifyFailure::new(format!("Malformed Rekor public key: {e}")))?;

    debug!(endpoint, "Fetched Rekor public key");
    Ok(key.to_vec())
}

#[async_trait]
impl ImageVerifier for CosignVerifier {
    async fn verify(
        &self,
        reference: &Reference,
        options: &CheckOptions,
    ) -> std::result::Result<VerifiedSignatures, VerifyFailure> {
        let image: OciReference = reference
            .whole()
            .parse()
            .map_err(|e| VerifyFailure::new(format!("Cannot parse image reference: {e}")))?;

        let mut trusted = self.trusted.lock().await;
        let current = match trusted.take() {
            Some(current) if current.serves(options) => current,
            _ => TrustedClient::build(options).await?,
        };
        let client = &mut trusted.insert(current).client;

        let (cosign_image, source_digest) = client
            .triangulate(&image, &self.auth)
            .await
            .map_err(|e| VerifyFailure::new(format!("Cannot locate signature image: {e}")))?;
        let layers = client
            .trusted_signature_layers(&self.auth, &source_digest, &cosign_image)
            .await
            .map_err(|e| VerifyFailure::new(format!("Cannot verify signature layers: {e}")))?;
        drop(trusted);

        debug!(
            image = %reference.whole(),
            rekor_url = %options.rekor_url,
            layers = layers.len(),
            "Trusted signature layers retrieved"
        );

        let bundle_verified = all_layers_bundled(&layers);
        Ok(VerifiedSignatures {
            signatures: layers.into_iter().map(signature_from_layer).collect(),
            bundle_verified,
        })
    }
}

/// Bundles are only attached to layers whose Rekor entry checked out against the log key.
fn all_layers_bundled(layers: &[SignatureLayer]) -> bool {
    !layers.is_empty() && layers.iter().all(|layer| layer.bundle.is_some())
}

fn signature_from_layer(layer: SignatureLayer) -> Arc<dyn Signature> {
    let plain = PlainSignature {
        payload: layer.raw_data,
        base64_signature: layer.signature.unwrap_or_default(),
        ..Default::default()
    };
    let certificate = layer
        .certificate_signature
        .map(|cert| match cert.subject {
            CertificateSubject::Email(email) => SigningCertificate::with_email(email),
            CertificateSubject::Uri(uri) => SigningCertificate::with_uri(uri),
        });

    match (layer.bundle, certificate) {
        (Some(bundle), certificate) => Arc::new(BundleSignature {
            plain,
            certificate,
            chain: Vec::new(),
            bundle: RekorBundle {
                signed_entry_timestamp: bundle.signed_entry_timestamp,
                payload: RekorPayload {
                    body: serde_json::Value::String(bundle.payload.body),
                    integrated_time: bundle.payload.integrated_time,
                    log_index: bundle.payload.log_index,
                    log_id: bundle.payload.log_id,
                },
            },
        }),
        (None, Some(certificate)) => Arc::new(CertificateSignature {
            plain,
            certificate,
            chain: Vec::new(),
        }),
        (None, None) => Arc::new(plain),
    }
}
