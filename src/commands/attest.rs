use anyhow::{Context, Result};
use podwarden::{AttestorDeps, K8sAttestor, ProcCgroupResolver};
use podwarden_config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handles the attest command
pub struct AttestCommand;

impl AttestCommand {
    /// Attests `pid` once and prints one selector per line.
    pub async fn execute(config: Config, pid: u32, proc_root: PathBuf) -> Result<()> {
        let deps = AttestorDeps::new().with_resolver(Arc::new(ProcCgroupResolver::new(proc_root)));
        let attestor =
            K8sAttestor::configure(&config, deps).context("Failed to configure attestor")?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling attestation");
                interrupt.cancel();
            }
        });

        let selectors = attestor
            .attest(pid, &cancel)
            .await
            .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
        for selector in &selectors {
            println!("{selector}");
        }
        attestor.shutdown();
        Ok(())
    }
}
