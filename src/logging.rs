//! Tracing setup.
//!
//! Logs go to stderr unless a directory is configured, in which case they go
//! to daily rotating files there. `RUST_LOG` overrides the configured level.

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "jobfeed.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))?,
  };

  match &config.directory {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));

      tracing_subscriber::registry()
        .with(filter)
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to initialize file logging: {}", e))?;

      info!(directory = %dir.display(), "logging to daily rotating files");
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to initialize console logging: {}", e))?;
      Ok(None)
    }
  }
}
