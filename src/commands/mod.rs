//! Subcommands of the `podwarden` binary

pub mod attest;
pub mod check_config;
pub mod cli;

pub use attest::AttestCommand;
pub use check_config::CheckConfigCommand;
pub use cli::{Cli, PodwardenCommand};
