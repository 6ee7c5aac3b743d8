//! Generic domain-message dispatch: `POST {prefix}/{*topic}`.
//!
//! Runs the full inbound pipeline shared by every protocol adapter: security
//! filter, authentication, rate limiting, schema validation, authorization,
//! then hands the sanitized envelope to the [`crate::router::MessageRouter`].

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::authn::AuthMethod;
use crate::authz::Resource;
use crate::bus::envelope::MessageEnvelope;
use crate::error::{Error, Result};
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

pub async fn dispatch(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let remote_ip = addr.ip().to_string();
    let sanitized = state.security.filter(&remote_ip, &payload)?;

    let identity = match bearer_token(&headers) {
        Some(token) => state.auth.authenticate(AuthMethod::Bearer, token).await?,
        None => return Err(Error::Authentication("missing bearer token".to_string())),
    };

    let client_id = identity.user_uuid.to_string();
    if !state.rate_limiter.check(&client_id, 1.0)? {
        return Err(Error::RateLimitExceeded);
    }

    let envelope = MessageEnvelope::new(identity.username.clone(), topic.clone(), sanitized);
    state.validator.validate(&envelope)?;
    state.authz.authorize(&identity, "publish", Resource::Envelope(&envelope))?;

    let result = state.router.route_message(envelope).await?;
    if result.success {
        Ok(Json(result.response.unwrap_or(serde_json::Value::Null)))
    } else if result.timed_out {
        let timeout_secs = state.router.get_routing_stats().timeout_secs;
        Err(Error::Timeout(std::time::Duration::from_secs(timeout_secs)))
    } else {
        Err(Error::Internal(result.error.unwrap_or_else(|| "routing failed".to_string())))
    }
}
