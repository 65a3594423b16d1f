//! C10: structured logging shared by every component (§4.10, ADDED).

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// Initialize the global `tracing` subscriber from `config.logging`. Must be
/// called exactly once, before any other component starts logging.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
