//! Shared plumbing for modgate gateway binaries.
//!
//! - [`config`] - JSON5 loading and the `logging` section
//! - [`args`] - `--config` / `--log-level` command line
//! - [`error`] - Setup errors

pub mod args;
pub mod config;
pub mod error;

pub use args::GatewayArgs;
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Logging(format!("invalid level '{}': {}", config.level, e)))?,
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "modgate=verbose".to_string(),
            format: LogFormat::Text,
        };

        // only meaningful when RUST_LOG does not override the level
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(init_tracing(&config), Err(Error::Logging(_))));
        }
    }
}
