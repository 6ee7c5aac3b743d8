//! REST protocol adapter (C13): the HTTP surface over the gateway core.
//! Auth endpoints are fixed routes; everything else is a generic
//! domain-topic dispatch under the configured API prefix.

pub mod auth;
pub mod dispatch;
pub mod gateway;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let prefix = state.config.service.api_prefix.clone();

    let auth_routes = Router::new()
        .route("/authenticate", post(auth::authenticate))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout));

    let domain_routes = Router::new().route("/{*topic}", post(dispatch::dispatch));

    Router::new()
        .route("/health", get(gateway::health))
        .route("/status", get(gateway::status))
        .route("/metrics", get(gateway::metrics))
        .nest(&format!("{prefix}/auth"), auth_routes)
        .nest(&prefix, domain_routes)
}
