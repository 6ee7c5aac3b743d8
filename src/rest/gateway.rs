//! Gateway introspection endpoints: liveness, routing/rate-limit status, and
//! logging-pipeline metrics.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::Result;
use crate::logging::LogRepository;
use crate::rate_limit::RateLimiterStats;
use crate::router::RoutingStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: state.config.service.name.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    pub service: String,
    pub environment: String,
    pub routing: RoutingStats,
    pub rate_limiter: RateLimiterStats,
    pub active_sessions: Option<i64>,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<GatewayStatus>> {
    let active_sessions = match state.auth.sessions() {
        Some(sessions) => Some(sessions.active_session_count().await?),
        None => None,
    };

    Ok(Json(GatewayStatus {
        service: state.config.service.name.clone(),
        environment: state.config.service.environment.clone(),
        routing: state.router.get_routing_stats(),
        rate_limiter: state.rate_limiter.get_stats(),
        active_sessions,
    }))
}

#[derive(Debug, Serialize)]
pub struct GatewayMetrics {
    pub log_buffer_len: usize,
    pub log_buffer_dropped: u64,
    pub persisted_log_count: i64,
}

pub async fn metrics(State(state): State<AppState>) -> Result<Json<GatewayMetrics>> {
    let (len, dropped) = {
        let buffer = state.logging.buffer();
        let guard = buffer.lock().await;
        (guard.len(), guard.dropped_count())
    };

    let persisted = LogRepository::new(state.db.clone()).count().await?;

    Ok(Json(GatewayMetrics {
        log_buffer_len: len,
        log_buffer_dropped: dropped,
        persisted_log_count: persisted,
    }))
}
