//! Logging bootstrap
//!
//! The library only emits `tracing` events; binaries call one of these once.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogConfig, LogLevel};

/// Initialize the logging system based on configuration
pub fn init(config: &LogConfig) {
    let level = match config.level {
        LogLevel::Off => return,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(config.with_thread_ids),
        )
        .try_init();
}

/// Initialize logging with default settings (for tests and quick starts)
pub fn init_default() {
    init(&LogConfig::default());
}
