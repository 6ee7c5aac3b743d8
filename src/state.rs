//! Shared application state (C1 composition root).
//!
//! A single `AppState` is built once at startup and cloned into every
//! protocol adapter (REST handlers via axum's `State` extractor, the
//! WebSocket adapter, the local IPC adapter). Cloning is cheap: every field
//! is either `Arc`-wrapped or already internally shared (the bus client,
//! the sqlite pool).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::authn::AuthManager;
use crate::authz::AuthzManager;
use crate::bus::client::BusClient;
use crate::config::Config;
use crate::logging::LogPipeline;
use crate::rate_limit::RateLimiter;
use crate::router::MessageRouter;
use crate::security::SecurityFilter;
use crate::validator::MessageValidator;

/// Tracks live WebSocket connections against the configured `max_connections`
/// ceiling. `acquire` is a single CAS loop rather than a `Semaphore` because
/// the limit is enforced at connect time only (an overload close, not a
/// backpressure wait) and permits are released from a scope guard rather
/// than an RAII-held `SemaphorePermit`.
#[derive(Clone, Default)]
pub struct WsConnectionCounter(Arc<AtomicUsize>);

impl WsConnectionCounter {
    /// Attempts to claim one connection slot. Returns `false` without
    /// mutating the counter if `max` is already reached.
    pub fn acquire(&self, max: usize) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return false;
            }
            match self.0.compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: BusClient,
    pub router: Arc<MessageRouter>,
    pub auth: Arc<AuthManager>,
    pub authz: Arc<AuthzManager>,
    pub rate_limiter: RateLimiter,
    pub security: Arc<SecurityFilter>,
    pub validator: Arc<MessageValidator>,
    pub logging: LogPipeline,
    pub db: SqlitePool,
    pub ws_connections: WsConnectionCounter,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        bus: BusClient,
        router: Arc<MessageRouter>,
        auth: Arc<AuthManager>,
        authz: Arc<AuthzManager>,
        rate_limiter: RateLimiter,
        security: Arc<SecurityFilter>,
        validator: Arc<MessageValidator>,
        logging: LogPipeline,
        db: SqlitePool,
    ) -> Self {
        Self {
            config,
            bus,
            router,
            auth,
            authz,
            rate_limiter,
            security,
            validator,
            logging,
            db,
            ws_connections: WsConnectionCounter::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_connection_counter_rejects_past_max() {
        let counter = WsConnectionCounter::default();
        assert!(counter.acquire(1));
        assert!(!counter.acquire(1));
        counter.release();
        assert!(counter.acquire(1));
    }
}
