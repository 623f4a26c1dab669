//! Structured logging.
//!
//! JSON lines in production, pretty fmt output in development. `RUST_LOG`
//! wins over the configured level when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EdgeConfig;

/// Default filter directives for a given base level.
pub fn default_directives(level: &str) -> String {
    format!("cilab_edge={level},tower_http={level}")
}

/// Install the global subscriber. Safe to call once per process.
pub fn init_logging(config: &EdgeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directives(&config.observability.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialised: {e}");
    }
}
