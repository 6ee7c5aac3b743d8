//! Authentication manager (C7) and session service (C6).
//!
//! Four methods are tried in order per request: `BEARER`, `API_KEY`,
//! `SESSION_COOKIE`, `TRUSTED_LOCAL` (the last only offered by the local IPC
//! adapter). All four ultimately validate a signed token; `API_KEY` and
//! `SESSION_COOKIE` differ only in where the token travels on the wire.

pub mod claims;
pub mod jwt;
pub mod password;
pub mod session;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::{JwtConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::keys::SharedKeyProvider;

pub use claims::{Claims, TokenType, UserIdentity};
pub use jwt::JwtCodec;
pub use password::{PasswordConfig, PasswordHasher};
pub use session::{SessionRecord, SessionService, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Bearer,
    ApiKey,
    SessionCookie,
    TrustedLocal,
}

/// A pair of tokens returned by login and refresh.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub jwt_token: String,
    pub refresh_token: String,
}

/// The out-of-scope collaborator that owns user records. The gateway core
/// only needs to ask "does this PIN/password match this user" and get back
/// the identity to embed in a token; user storage itself is an external
/// concern per the project's scope boundary.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn verify_pin(&self, user_uuid: Uuid, pin: &str) -> Result<Option<UserIdentity>>;
    async fn verify_password(&self, user_uuid: Uuid, password_hash: &str, password: &str) -> Result<Option<UserIdentity>>;
}

pub struct AuthManager {
    jwt: JwtCodec,
    sessions: Option<SessionService>,
    passwords: PasswordHasher,
    /// Fallback revocation set used only when the session store is
    /// unavailable; per the spec's "if the session store is unavailable the
    /// token is added to an in-memory revocation set" clause.
    fallback_revoked: DashMap<String, ()>,
}

impl AuthManager {
    pub fn new(jwt_config: JwtConfig, keys: SharedKeyProvider, sessions: Option<SessionService>) -> Self {
        Self {
            jwt: JwtCodec::new(jwt_config, keys),
            sessions,
            passwords: PasswordHasher::default(),
            fallback_revoked: DashMap::new(),
        }
    }

    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.passwords = PasswordHasher::new(config);
        self
    }

    pub fn passwords(&self) -> &PasswordHasher {
        &self.passwords
    }

    /// Issues an access token and, if a session store is configured, a
    /// backing session row.
    pub async fn generate_access_token(&self, identity: &UserIdentity, device_uuid: &str) -> Result<String> {
        let (token, claims) = self.jwt.generate_access_token(identity)?;
        if let Some(sessions) = &self.sessions {
            let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(chrono::Utc::now);
            sessions.create_session(identity.user_uuid, device_uuid, &token, expires_at).await?;
        }
        Ok(token)
    }

    pub async fn generate_refresh_token(&self, identity: &UserIdentity, device_uuid: &str) -> Result<String> {
        let (token, claims) = self.jwt.generate_refresh_token(identity)?;
        if let Some(sessions) = &self.sessions {
            let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(chrono::Utc::now);
            sessions.create_session(identity.user_uuid, device_uuid, &token, expires_at).await?;
        }
        Ok(token)
    }

    pub async fn login(&self, identity: UserIdentity, device_uuid: &str) -> Result<TokenPair> {
        let jwt_token = self.generate_access_token(&identity, device_uuid).await?;
        let refresh_token = self.generate_refresh_token(&identity, device_uuid).await?;
        Ok(TokenPair { jwt_token, refresh_token })
    }

    /// Validates a bearer token: session status (if configured) first, then
    /// signature and expiry, in that order, matching the manager's contract.
    pub async fn authenticate_jwt(&self, token: &str) -> Result<UserIdentity> {
        if self.fallback_revoked.contains_key(token) {
            return Err(Error::Authentication("token revoked".to_string()));
        }

        if let Some(sessions) = &self.sessions {
            if !sessions.is_active(token).await? {
                return Err(Error::Authentication("token revoked".to_string()));
            }
        }

        let claims = self.jwt.decode(token)?;
        Ok(claims.into())
    }

    /// Resolves the identity for whichever of the four auth methods applies.
    /// `TRUSTED_LOCAL` bypasses token validation entirely and is only ever
    /// offered by the local IPC adapter.
    pub async fn authenticate(&self, method: AuthMethod, credential: &str) -> Result<UserIdentity> {
        match method {
            AuthMethod::TrustedLocal => Ok(UserIdentity::trusted_local()),
            AuthMethod::Bearer | AuthMethod::ApiKey | AuthMethod::SessionCookie => {
                self.authenticate_jwt(credential).await
            }
        }
    }

    /// Idempotent: marks the backing session revoked, or (if no session
    /// store, or the lookup fails) falls back to an in-memory set.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        match &self.sessions {
            Some(sessions) => sessions.revoke_token(token).await,
            None => {
                self.fallback_revoked.insert(token.to_string(), ());
                Ok(())
            }
        }
    }

    /// Session rotation: validates `current`, revokes its session, and
    /// issues a fresh access token bound to a fresh session row. The
    /// previous token is rejected by the next `authenticate_jwt` call.
    pub async fn refresh_token(&self, current: &str, device_uuid: &str) -> Result<String> {
        let identity = self.authenticate_jwt(current).await?;
        self.revoke_token(current).await?;
        self.generate_access_token(&identity, device_uuid).await
    }

    pub fn sessions(&self) -> Option<&SessionService> {
        self.sessions.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_sqlite_pool;
    use crate::keys::EnvKeyProvider;
    use std::sync::Arc;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            algorithm: "HS256".to_string(),
            issuer: "aico-api-gateway".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 7 * 24 * 3600,
        }
    }

    async fn manager_with_sessions() -> AuthManager {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let sessions = SessionService::new(
            pool,
            SessionConfig {
                database_url: "sqlite::memory:".to_string(),
                max_sessions_per_user: 10,
                cleanup_interval_hours: 24,
                cleanup_age_days: 30,
            },
        );
        AuthManager::new(jwt_config(), Arc::new(EnvKeyProvider::load()), Some(sessions))
    }

    fn identity() -> UserIdentity {
        UserIdentity {
            user_uuid: Uuid::new_v4(),
            username: "alice".to_string(),
            roles: vec!["user".to_string()],
            permissions: vec!["conversation.*".to_string()],
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn revoke_token_is_immediately_visible() {
        let manager = manager_with_sessions().await;
        let identity = identity();
        let token = manager.generate_access_token(&identity, "device-1").await.unwrap();

        assert!(manager.authenticate_jwt(&token).await.is_ok());
        manager.revoke_token(&token).await.unwrap();
        assert!(matches!(
            manager.authenticate_jwt(&token).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_session_and_rejects_old_token() {
        let manager = manager_with_sessions().await;
        let identity = identity();
        let access = manager.generate_access_token(&identity, "device-1").await.unwrap();

        let rotated = manager.refresh_token(&access, "device-1").await.unwrap();

        assert!(manager.authenticate_jwt(&rotated).await.is_ok());
        assert!(matches!(
            manager.authenticate_jwt(&access).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn revoke_without_session_store_uses_fallback_set() {
        let manager = AuthManager::new(jwt_config(), Arc::new(EnvKeyProvider::load()), None);
        let identity = identity();
        let token = manager.generate_access_token(&identity, "device-1").await.unwrap();

        assert!(manager.authenticate_jwt(&token).await.is_ok());
        manager.revoke_token(&token).await.unwrap();
        assert!(manager.authenticate_jwt(&token).await.is_err());
    }
}
