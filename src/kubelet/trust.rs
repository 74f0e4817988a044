//! Kubelet trust modes and the credential material behind them

use podwarden_config::{KubeletConfig, KubeletPort};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::{CertifiedKey, SingleCertAndKey};
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::client::KubeletClient;
use super::verifier::{AcceptAnyServerCert, CaChainVerifier};
use crate::error::{AttestorError, Result};

/// How the kubelet's serving certificate is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVerification {
    Skip,
    /// Chain and host name against the kubelet CA
    CaWithHostname,
    /// Chain against the kubelet CA, host name ignored
    CaChainOnly,
}

/// Where the attestor's own credentials come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Anonymous,
    ClientCertificate {
        certificate: PathBuf,
        private_key: PathBuf,
    },
    BearerToken(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureTrust {
    pub verification: ServerVerification,
    pub ca_path: PathBuf,
    pub credentials: CredentialSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeletMode {
    /// Plain HTTP on the read-only port
    ReadOnly,
    Secure(SecureTrust),
}

/// Everything needed to (re)build a kubelet client from disk.
///
/// Paths are kept rather than their contents so that [`TrustConfig::build_client`]
/// picks up rotated tokens and certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    url: Url,
    node_name: Option<String>,
    mode: KubeletMode,
}

impl TrustConfig {
    /// Resolves the trust mode, consulting `env` for the node name.
    pub fn from_config(config: &KubeletConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let node_name = config
            .node_name
            .clone()
            .or_else(|| env(config.node_name_env()))
            .filter(|name| !name.is_empty());

        let (url, mode) = match config.port()? {
            KubeletPort::ReadOnly(port) => (
                parse_url(&format!("http://127.0.0.1:{port}"))?,
                KubeletMode::ReadOnly,
            ),
            KubeletPort::Secure(port) => {
                let host = node_name.as_deref().unwrap_or("127.0.0.1");
                let verification = match (config.skip_kubelet_verification, &node_name) {
                    (true, _) => ServerVerification::Skip,
                    (false, Some(_)) => ServerVerification::CaWithHostname,
                    (false, None) => ServerVerification::CaChainOnly,
                };
                let credentials = if config.use_anonymous_authentication {
                    CredentialSource::Anonymous
                } else if let Some((certificate, private_key)) = config.client_keypair_paths()? {
                    CredentialSource::ClientCertificate {
                        certificate,
                        private_key,
                    }
                } else {
                    CredentialSource::BearerToken(config.token_path())
                };
                (
                    parse_url(&format!("https://{host}:{port}"))?,
                    KubeletMode::Secure(SecureTrust {
                        verification,
                        ca_path: config.kubelet_ca_path(),
                        credentials,
                    }),
                )
            }
        };

        Ok(Self {
            url,
            node_name,
            mode,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    pub fn mode(&self) -> &KubeletMode {
        &self.mode
    }

    /// Reads credential material from disk and builds a fresh client.
    pub fn build_client(&self) -> Result<KubeletClient> {
        let trust = match &self.mode {
            KubeletMode::ReadOnly => return KubeletClient::insecure(self.url.clone()),
            KubeletMode::Secure(trust) => trust,
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| AttestorError::config_with("unable to configure TLS", e))?;

        let builder = match trust.verification {
            ServerVerification::Skip => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider.clone()))),
            ServerVerification::CaWithHostname => {
                builder.with_root_certificates(load_kubelet_ca(&trust.ca_path)?)
            }
            ServerVerification::CaChainOnly => {
                let verifier = CaChainVerifier::new(load_kubelet_ca(&trust.ca_path)?, provider.clone())?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
            }
        };

        let (tls, token) = match &trust.credentials {
            CredentialSource::Anonymous => (builder.with_no_client_auth(), None),
            CredentialSource::ClientCertificate {
                certificate,
                private_key,
            } => {
                let (chain, key) = load_keypair(certificate, private_key)?;
                // Certificate and key are not cross-checked; a mismatch fails the next handshake.
                let signing_key = provider
                    .key_provider
                    .load_private_key(key)
                    .map_err(|e| AttestorError::config_with("unable to load keypair", e))?;
                let resolver = SingleCertAndKey::from(CertifiedKey::new(chain, signing_key));
                (builder.with_client_cert_resolver(Arc::new(resolver)), None)
            }
            CredentialSource::BearerToken(path) => {
                (builder.with_no_client_auth(), Some(load_token(path)?))
            }
        };

        debug!(url = %self.url, mode = %self, "Built kubelet client");
        KubeletClient::secure(self.url.clone(), tls, token)
    }
}

impl fmt::Display for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trust = match &self.mode {
            KubeletMode::ReadOnly => return f.write_str("read-only"),
            KubeletMode::Secure(trust) => trust,
        };
        let verification = match trust.verification {
            ServerVerification::Skip => "verification skipped",
            ServerVerification::CaWithHostname => "CA verified",
            ServerVerification::CaChainOnly => "CA verified, host name ignored",
        };
        let credentials = match trust.credentials {
            CredentialSource::Anonymous => "anonymous",
            CredentialSource::ClientCertificate { .. } => "client certificate",
            CredentialSource::BearerToken(_) => "bearer token",
        };
        write!(f, "secure ({verification}, {credentials})")
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| AttestorError::config_with("malformed kubelet URL", e))
}

fn load_kubelet_ca(path: &Path) -> Result<RootCertStore> {
    let pem = std::fs::read(path)
        .map_err(|e| AttestorError::config_with("unable to load kubelet CA", e))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AttestorError::config_with("unable to parse kubelet CA", e))?;
    if certs.is_empty() {
        return Err(AttestorError::config("unable to parse kubelet CA: no certificates found"));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| AttestorError::config_with("unable to parse kubelet CA", e))?;
    }
    Ok(roots)
}

fn load_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .map_err(|e| AttestorError::config_with("unable to load token", e))?;
    Ok(token.trim().to_string())
}

fn load_keypair(
    certificate: &Path,
    private_key: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_pem = std::fs::read(certificate)
        .map_err(|e| AttestorError::config_with("unable to load certificate", e))?;
    let key_pem = std::fs::read(private_key)
        .map_err(|e| AttestorError::config_with("unable to load private key", e))?;

    let chain = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AttestorError::config_with("unable to load keypair", e))?;
    if chain.is_empty() {
        return Err(AttestorError::config("unable to load keypair: no certificates found"));
    }
    let key = PrivateKeyDer::from_pem_slice(&key_pem)
        .map_err(|e| AttestorError::config_with("unable to load keypair", e))?;
    Ok((chain, key))
}
