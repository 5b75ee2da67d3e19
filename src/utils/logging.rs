//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry built from [`LoggingConfig`]:
//! console and/or file output, plain or JSON lines, filtered by `RUST_LOG`
//! when set and by the configured level otherwise.

use crate::config::LoggingConfig;
use crate::error::{ProbeError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ProbeError::ConfigError(errors.join("; ")));
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let layer = fmt::layer().with_writer(std::io::stderr);
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if config.log_to_file {
        if let Some(ref path) = config.log_file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ProbeError::ConfigError(format!("Failed to open log file: {e}")))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            layers.push(if config.json_format {
                layer.json().boxed()
            } else {
                layer.boxed()
            });
        }
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    if tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok()
    {
        debug!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }

    Ok(())
}
