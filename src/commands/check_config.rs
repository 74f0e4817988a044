use anyhow::Result;
use podwarden::TrustConfig;
use podwarden_config::Config;
use std::path::Path;

/// Handles the check-config command
pub struct CheckConfigCommand;

impl CheckConfigCommand {
    /// Builds the kubelet trust configuration from disk and prints a report.
    pub async fn execute(config: Config, path: &Path) -> Result<()> {
        println!("podwarden configuration check: {}", path.display());

        let trust =
            TrustConfig::from_config(&config.kubelet, &|key: &str| std::env::var(key).ok())?;
        println!("  kubelet url:         {}", trust.url());
        println!("  kubelet mode:        {trust}");
        if let Some(node) = trust.node_name() {
            println!("  node name:           {node}");
        }
        println!(
            "  max poll attempts:   {}",
            config.kubelet.max_poll_attempts()
        );
        println!(
            "  poll retry interval: {:?}",
            config.kubelet.poll_retry_interval()?
        );
        println!(
            "  reload interval:     {:?}",
            config.kubelet.reload_interval()?
        );

        match trust.build_client() {
            Ok(_) => println!("  credentials:         ok"),
            Err(e) => {
                println!("  credentials:         {e}");
                anyhow::bail!("kubelet credentials are not usable: {e}");
            }
        }

        match &config.experimental.sigstore {
            Some(sigstore) => {
                println!("  sigstore:            enabled");
                println!("    rekor url:         {}", sigstore.rekor_url());
                println!(
                    "    skipped images:    {}",
                    sigstore.skip_signature_verification_image_list.len()
                );
                println!(
                    "    allowed subjects:  {}",
                    if sigstore.enable_allowed_subjects_list {
                        sigstore.allowed_subjects_list.len().to_string()
                    } else {
                        "any".to_string()
                    }
                );
            }
            None => println!("  sigstore:            disabled"),
        }
        Ok(())
    }
}
