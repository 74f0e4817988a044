use anyhow::{Context, Result};
use clap::Parser;
use podwarden_config::Config;
use tracing::{info, warn};

use crate::commands::{AttestCommand, CheckConfigCommand, Cli, PodwardenCommand};

/// Loads the configuration file and applies `PODWARDEN_*` overrides.
pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let mut config = Config::from_file(path)?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    Ok(config)
}

/// Entry point invoked by `main.rs`.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_config(cli.command.config_path()) {
        Ok(config) => config,
        Err(err) => {
            let _ = podwarden_logging::init_console_logging("info");
            return Err(err);
        }
    };
    if let Err(err) = podwarden_logging::init_logging(&config.logging) {
        let _ = podwarden_logging::init_console_logging("info");
        warn!("Falling back to console logging: {err}");
    }

    match cli.command {
        PodwardenCommand::Attest {
            config: path,
            pid,
            proc_root,
        } => {
            info!("Attesting pid {} with config: {}", pid, path.display());
            AttestCommand::execute(config, pid, proc_root).await
        }
        PodwardenCommand::CheckConfig { config: path } => {
            info!("Checking configuration: {}", path.display());
            CheckConfigCommand::execute(config, &path).await
        }
    }
}
