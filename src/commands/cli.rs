use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI definition for the podwarden binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "podwarden")]
pub struct Cli {
    #[command(subcommand)]
    pub command: PodwardenCommand,
}

#[derive(Subcommand, Debug)]
pub enum PodwardenCommand {
    /// Attest a process once and print its selectors
    Attest {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/podwarden/config.toml")]
        config: PathBuf,
        /// Process to attest
        #[arg(short, long)]
        pid: u32,
        /// Mount point of the host's proc filesystem
        #[arg(long, env = "PODWARDEN_PROC_ROOT", default_value = "/proc")]
        proc_root: PathBuf,
    },
    /// Validate configuration and credential material
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/podwarden/config.toml")]
        config: PathBuf,
    },
}

impl PodwardenCommand {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            PodwardenCommand::Attest { config, .. } | PodwardenCommand::CheckConfig { config } => {
                config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attest() {
        let cli = Cli::parse_from(["podwarden", "attest", "--pid", "4242", "-c", "/tmp/pw.toml"]);
        match cli.command {
            PodwardenCommand::Attest {
                config,
                pid,
                proc_root,
            } => {
                assert_eq!(config, PathBuf::from("/tmp/pw.toml"));
                assert_eq!(pid, 4242);
                assert_eq!(proc_root, PathBuf::from("/proc"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_check_config_default_path() {
        let cli = Cli::parse_from(["podwarden", "check-config"]);
        assert_eq!(
            cli.command.config_path(),
            &PathBuf::from("/etc/podwarden/config.toml")
        );
    }

    #[test]
    fn test_attest_requires_pid() {
        assert!(Cli::try_parse_from(["podwarden", "attest"]).is_err());
    }
}
