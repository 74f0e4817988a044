use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SECURE_PORT: u16 = 10250;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;
pub const DEFAULT_POLL_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const DEFAULT_KUBELET_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
pub const DEFAULT_NODE_NAME_ENV: &str = "MY_NODE_NAME";

/// Kubelet connection and polling settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubeletConfig {
    /// Plain HTTP read-only port. Mutually exclusive with `secure_port`.
    pub read_only_port: Option<u16>,

    /// HTTPS port. Defaults to 10250 when no port is configured.
    pub secure_port: Option<u16>,

    /// Accept any kubelet serving certificate
    pub skip_kubelet_verification: bool,

    /// CA bundle used to verify the kubelet serving certificate
    pub kubelet_ca_path: Option<PathBuf>,

    /// Service account token presented as a bearer token
    pub token_path: Option<PathBuf>,

    /// Client certificate for mutual TLS
    pub certificate_path: Option<PathBuf>,

    /// Private key matching `certificate_path`
    pub private_key_path: Option<PathBuf>,

    /// Connect without any client credentials
    pub use_anonymous_authentication: bool,

    /// Node name used as the kubelet host. Takes precedence over `node_name_env`.
    pub node_name: Option<String>,

    /// Environment variable holding the node name
    pub node_name_env: Option<String>,

    pub max_poll_attempts: Option<u32>,

    /// Delay between pod list polls, in humantime syntax ("500ms", "1s")
    pub poll_retry_interval: Option<String>,

    /// Interval between credential reloads, in humantime syntax
    pub reload_interval: Option<String>,

    /// Only emit pod-level selectors
    pub disable_container_selectors: bool,
}

/// Which kubelet port the attestor talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeletPort {
    ReadOnly(u16),
    Secure(u16),
}

impl KubeletConfig {
    /// Resolve the configured port, rejecting configurations that set both.
    pub fn port(&self) -> Result<KubeletPort> {
        match (self.read_only_port, self.secure_port) {
            (Some(_), Some(_)) => Err(anyhow!("cannot use both the read-only and secure port")),
            (Some(port), None) => Ok(KubeletPort::ReadOnly(port)),
            (None, Some(port)) => Ok(KubeletPort::Secure(port)),
            (None, None) => Ok(KubeletPort::Secure(DEFAULT_SECURE_PORT)),
        }
    }

    pub fn max_poll_attempts(&self) -> u32 {
        self.max_poll_attempts.unwrap_or(DEFAULT_MAX_POLL_ATTEMPTS)
    }

    pub fn poll_retry_interval(&self) -> Result<Duration> {
        parse_interval(self.poll_retry_interval.as_deref(), DEFAULT_POLL_RETRY_INTERVAL)
            .context("unable to parse poll retry interval")
    }

    pub fn reload_interval(&self) -> Result<Duration> {
        parse_interval(self.reload_interval.as_deref(), DEFAULT_RELOAD_INTERVAL)
            .context("unable to parse reload interval")
    }

    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH))
    }

    pub fn kubelet_ca_path(&self) -> PathBuf {
        self.kubelet_ca_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KUBELET_CA_PATH))
    }

    pub fn node_name_env(&self) -> &str {
        self.node_name_env.as_deref().unwrap_or(DEFAULT_NODE_NAME_ENV)
    }

    /// Certificate and key paths, if client certificate auth is configured.
    pub fn client_keypair_paths(&self) -> Result<Option<(PathBuf, PathBuf)>> {
        match (&self.certificate_path, &self.private_key_path) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (Some(_), None) => Err(anyhow!(
                "the private key path is required with the certificate path"
            )),
            (None, Some(_)) => Err(anyhow!(
                "the certificate path is required with the private key path"
            )),
            (None, None) => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.port()?;
        if self.max_poll_attempts == Some(0) {
            return Err(anyhow!("max_poll_attempts must be greater than zero"));
        }
        self.poll_retry_interval()?;
        self.reload_interval()?;
        self.client_keypair_paths()?;
        Ok(())
    }
}

fn parse_interval(raw: Option<&str>, default: Duration) -> Result<Duration> {
    match raw {
        None => Ok(default),
        Some(value) => humantime::parse_duration(value.trim())
            .with_context(|| format!("invalid duration {:?}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_defaults_to_secure() {
        let config = KubeletConfig::default();
        assert_eq!(config.port().unwrap(), KubeletPort::Secure(DEFAULT_SECURE_PORT));
    }

    #[test]
    fn test_both_ports_rejected() {
        let config = KubeletConfig {
            read_only_port: Some(10255),
            secure_port: Some(10250),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot use both the read-only and secure port"));
    }

    #[test]
    fn test_interval_parsing() {
        let mut config = KubeletConfig {
            poll_retry_interval: Some("1s".to_string()),
            ..Default::default()
        };
        assert_eq!(config.poll_retry_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(config.reload_interval().unwrap(), DEFAULT_RELOAD_INTERVAL);

        config.poll_retry_interval = Some("blah".to_string());
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("unable to parse poll retry interval"));

        config.poll_retry_interval = None;
        config.reload_interval = Some("blah".to_string());
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("unable to parse reload interval"));
    }

    #[test]
    fn test_keypair_paths_must_be_paired() {
        let cert_only = KubeletConfig {
            certificate_path: Some("cert".into()),
            ..Default::default()
        };
        assert!(cert_only
            .validate()
            .unwrap_err()
            .to_string()
            .contains("the private key path is required with the certificate path"));

        let key_only = KubeletConfig {
            private_key_path: Some("key".into()),
            ..Default::default()
        };
        assert!(key_only
            .validate()
            .unwrap_err()
            .to_string()
            .contains("the certificate path is required with the private key path"));
    }

    #[test]
    fn test_zero_poll_attempts_rejected() {
        let config = KubeletConfig {
            max_poll_attempts: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(KubeletConfig::default().max_poll_attempts(), 60);
    }
}
