use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "podwarden=debug,reqwest=warn"
    pub level: String,

    /// Emit newline-delimited JSON instead of human readable lines
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(anyhow!("log level cannot be empty"));
        }
        Ok(())
    }
}
