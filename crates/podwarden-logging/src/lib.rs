//! Logging setup for the podwarden attestor
//!
//! Installs a global `tracing` subscriber with an RFC 3339 UTC timer. The
//! filter comes from `RUST_LOG` when set, otherwise from the configured level.
//!
//! ```rust,ignore
//! use podwarden_config::LoggingConfig;
//!
//! podwarden_logging::init_logging(&LoggingConfig::default())?;
//! tracing::info!("attestor started");
//! ```

use podwarden_config::LoggingConfig;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

pub mod error;

pub use error::{LoggingError, LoggingResult};

/// Build the filter for `level`, letting `RUST_LOG` take precedence.
pub fn build_filter(level: &str) -> LoggingResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|err| LoggingError::InvalidFilter {
        directive: level.to_string(),
        reason: err.to_string(),
    })
}

/// Install the global subscriber described by `config`.
///
/// A subscriber that is already installed is left in place.
pub fn init_logging(config: &LoggingConfig) -> LoggingResult<()> {
    config
        .validate()
        .map_err(|err| LoggingError::Config(err.to_string()))?;
    let env_filter = build_filter(&config.level)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_level(true);

    if config.json_format {
        let _ = builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init();
    } else {
        let _ = builder.try_init();
    }

    Ok(())
}

/// Initialize plain console logging at `level`.
pub fn init_console_logging(level: &str) -> LoggingResult<()> {
    init_logging(&LoggingConfig {
        level: level.to_string(),
        json_format: false,
    })
}
