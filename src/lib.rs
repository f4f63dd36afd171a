pub mod catalog;
pub mod config;
pub mod curation;
pub mod db;
pub mod engine;
pub mod models;

pub use engine::CurationEngine;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, falling back to `config::default_log_filter()`. Safe to
/// call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
