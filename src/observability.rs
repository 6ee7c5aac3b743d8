//! Structured logging initialization for the process's own console/JSON
//! output (distinct from the application-level [`crate::logging`] pipeline,
//! which persists gateway-domain log entries to the `logs` table).

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initializes the global `tracing` subscriber, filtered by
/// `config.service.log_level` (falling back to `info` if it fails to parse
/// as an `EnvFilter` directive). JSON output in production, pretty
/// human-readable output otherwise — `RUST_LOG`/`AICO_LOG_LEVEL` still
/// override the level either way since `EnvFilter` consults the process
/// environment itself.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.service.environment == "production" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!(service = %config.service.name, environment = %config.service.environment, "tracing initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic() {
        let config = Config::default();
        let _ = init_tracing(&config);
    }
}
