//! # Logging
//!
//! Structured tracing setup: an `EnvFilter`-driven console layer plus a
//! daily-rolling JSON file layer, combined via `tracing_subscriber::registry()`
//! — the same shape as `server_speak.rs::setup_logging`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initializes the global tracing subscriber. The returned [`WorkerGuard`]
/// must be held for the lifetime of the process — dropping it flushes and
/// tears down the non-blocking file writer, so `main` keeps it bound until
/// shutdown.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "enrolld.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(true).with_level(true);
    let file_layer = fmt::layer().json().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
