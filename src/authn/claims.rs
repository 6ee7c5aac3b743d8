//! Token claims and the identity resolved from them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims, as composed by `generate_access_token`/`generate_refresh_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub user_uuid: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Resolved from a validated token's claims. The authoritative snapshot of
/// who the caller is for the lifetime of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_uuid: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl From<Claims> for UserIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            user_uuid: claims.user_uuid,
            username: claims.username,
            roles: claims.roles,
            permissions: claims.permissions,
            metadata: std::collections::BTreeMap::new(),
        }
    }
}

impl UserIdentity {
    /// The fixed, scope-limited identity granted to requests arriving over
    /// the local IPC adapter (`TRUSTED_LOCAL` auth method).
    pub fn trusted_local() -> Self {
        Self {
            user_uuid: Uuid::nil(),
            username: "trusted-local".to_string(),
            roles: vec!["local".to_string()],
            permissions: vec!["local.*".to_string()],
            metadata: std::collections::BTreeMap::new(),
        }
    }
}
