//! Configuration for the podwarden workload attestor
//!
//! Configuration can be loaded from:
//! - TOML configuration files
//! - Environment variables (PODWARDEN_* prefix)
//! - Programmatic defaults via [`ConfigBuilder`]
//!
//! # Example
//!
//! ```rust,no_run
//! use podwarden_config::Config;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut config = Config::from_file("/etc/podwarden/config.toml")?;
//! config.apply_env_overrides()?;
//! println!("poll attempts: {}", config.kubelet.max_poll_attempts());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod kubelet;
pub mod logging;
pub mod sigstore;

pub use kubelet::{KubeletConfig, KubeletPort};
pub use logging::LoggingConfig;
pub use sigstore::{ExperimentalConfig, SigstoreConfig};

/// Top level attestor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub kubelet: KubeletConfig,
    pub experimental: ExperimentalConfig,
    pub logging: LoggingConfig,
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_only_port(mut self, port: u16) -> Self {
        self.config.kubelet.read_only_port = Some(port);
        self.config.kubelet.secure_port = None;
        self
    }

    pub fn with_secure_port(mut self, port: u16) -> Self {
        self.config.kubelet.secure_port = Some(port);
        self.config.kubelet.read_only_port = None;
        self
    }

    pub fn with_kubelet_ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kubelet.kubelet_ca_path = Some(path.into());
        self
    }

    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kubelet.token_path = Some(path.into());
        self
    }

    pub fn with_client_keypair(
        mut self,
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        self.config.kubelet.certificate_path = Some(certificate_path.into());
        self.config.kubelet.private_key_path = Some(private_key_path.into());
        self
    }

    pub fn with_skip_kubelet_verification(mut self, skip: bool) -> Self {
        self.config.kubelet.skip_kubelet_verification = skip;
        self
    }

    pub fn with_anonymous_authentication(mut self, anonymous: bool) -> Self {
        self.config.kubelet.use_anonymous_authentication = anonymous;
        self
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.config.kubelet.node_name = Some(node_name.into());
        self
    }

    pub fn with_node_name_env(mut self, env: impl Into<String>) -> Self {
        self.config.kubelet.node_name_env = Some(env.into());
        self
    }

    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.kubelet.max_poll_attempts = Some(attempts);
        self
    }

    pub fn with_poll_retry_interval(mut self, interval: impl Into<String>) -> Self {
        self.config.kubelet.poll_retry_interval = Some(interval.into());
        self
    }

    pub fn with_reload_interval(mut self, interval: impl Into<String>) -> Self {
        self.config.kubelet.reload_interval = Some(interval.into());
        self
    }

    pub fn with_container_selectors_disabled(mut self, disabled: bool) -> Self {
        self.config.kubelet.disable_container_selectors = disabled;
        self
    }

    pub fn with_sigstore(mut self, sigstore: SigstoreConfig) -> Self {
        self.config.experimental.sigstore = Some(sigstore);
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml_str(&content)
    }

    /// Decode and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("unable to decode configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kubelet.validate()?;
        if let Some(sigstore) = &self.experimental.sigstore {
            sigstore.validate()?;
        }
        self.logging.validate()?;
        Ok(())
    }

    /// Apply PODWARDEN_* environment variable overrides, then re-validate
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|name| std::env::var(name).ok())
    }

    fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kubelet = &mut self.kubelet;
        apply_env_parse(&lookup, "PODWARDEN_KUBELET_READ_ONLY_PORT", &mut kubelet.read_only_port)?;
        apply_env_parse(&lookup, "PODWARDEN_KUBELET_SECURE_PORT", &mut kubelet.secure_port)?;
        apply_env_parse(&lookup, "PODWARDEN_MAX_POLL_ATTEMPTS", &mut kubelet.max_poll_attempts)?;
        apply_env_string(&lookup, "PODWARDEN_NODE_NAME", &mut kubelet.node_name);
        apply_env_string(&lookup, "PODWARDEN_POLL_RETRY_INTERVAL", &mut kubelet.poll_retry_interval);
        apply_env_string(&lookup, "PODWARDEN_RELOAD_INTERVAL", &mut kubelet.reload_interval);
        if let Some(path) = lookup("PODWARDEN_TOKEN_PATH") {
            kubelet.token_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("PODWARDEN_KUBELET_CA_PATH") {
            kubelet.kubelet_ca_path = Some(PathBuf::from(path));
        }

        if let Some(level) = lookup("PODWARDEN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("PODWARDEN_LOG_JSON") {
            self.logging.json_format = json
                .parse()
                .with_context(|| "Invalid PODWARDEN_LOG_JSON value".to_string())?;
        }

        self.validate()
    }
}

fn apply_env_string<F>(lookup: &F, var_name: &str, target: &mut Option<String>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var_name) {
        *target = Some(value);
    }
}

fn apply_env_parse<F, T>(lookup: &F, var_name: &str, target: &mut Option<T>) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + std::error::Error + 'static,
{
    if let Some(value) = lookup(var_name) {
        *target = Some(
            value
                .parse()
                .with_context(|| format!("Invalid {} value", var_name))?,
        );
    }
    Ok(())
}
