//! Auth endpoints (`POST {prefix}/auth/authenticate|refresh|logout`).
//!
//! Verifying raw credentials (PIN, password) against a user record is an
//! external collaborator's responsibility per the gateway's scope boundary
//! (see [`crate::authn::CredentialStore`]); these handlers accept an
//! already-established identity assertion and are responsible only for
//! minting and rotating the tokens that back it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authn::UserIdentity;
use crate::error::{Error, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub user_uuid: Uuid,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub device_uuid: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<TokenResponse>> {
    if req.username.trim().is_empty() {
        return Err(Error::Validation("username must not be empty".to_string()));
    }
    if req.device_uuid.trim().is_empty() {
        return Err(Error::Validation("device_uuid must not be empty".to_string()));
    }

    let identity = UserIdentity {
        user_uuid: req.user_uuid,
        username: req.username,
        roles: req.roles,
        permissions: req.permissions,
        metadata: Default::default(),
    };

    let pair = state.auth.login(identity, &req.device_uuid).await?;
    Ok(Json(TokenResponse {
        access_token: pair.jwt_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer",
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub device_uuid: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> Result<Json<RefreshResponse>> {
    let access_token = state.auth.refresh_token(&req.refresh_token, &req.device_uuid).await?;
    Ok(Json(RefreshResponse { access_token, token_type: "Bearer" }))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

pub async fn logout(State(state): State<AppState>, Json(req): Json<LogoutRequest>) -> Result<StatusCode> {
    state.auth.revoke_token(&req.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
