//! Session service (C6): persists bearer tokens so they can be revoked or
//! rotated independently of their signature/expiry. Backed by the `sessions`
//! sqlite table described in the project's wire interfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "revoked" => SessionStatus::Revoked,
            "expired" => SessionStatus::Expired,
            _ => SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_uuid: Uuid,
    pub device_uuid: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
}

/// Hashes a raw token for lookup/storage. Raw tokens are never persisted.
fn token_hash(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// The session store. One instance per process, backed by a shared sqlite pool.
#[derive(Clone)]
pub struct SessionService {
    pool: SqlitePool,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(pool: SqlitePool, config: SessionConfig) -> Self {
        Self { pool, config }
    }

    /// Creates a new active session row bound to `token`. Used right after a
    /// new access or refresh token is signed.
    pub async fn create_session(
        &self,
        user_uuid: Uuid,
        device_uuid: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let hash = token_hash(token);

        sqlx::query(
            "INSERT INTO sessions (session_id, user_uuid, device_uuid, token_hash, created_at, expires_at, status, last_activity, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, '{}')",
        )
        .bind(session_id.to_string())
        .bind(user_uuid.to_string())
        .bind(device_uuid)
        .bind(&hash)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .bind(SessionStatus::Active.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(session_id)
    }

    /// Looks up the session backing `token`. Returns `None` if no row matches
    /// (the caller then treats the token as having no session binding at all).
    pub async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>> {
        let hash = token_hash(token);
        let row: Option<(String, String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity
             FROM sessions WHERE token_hash = ?",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity)| {
            SessionRecord {
                session_id: session_id.parse().unwrap_or_default(),
                user_uuid: user_uuid.parse().unwrap_or_default(),
                device_uuid,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                expires_at: DateTime::parse_from_rfc3339(&expires_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                status: SessionStatus::parse(&status),
                last_activity: DateTime::parse_from_rfc3339(&last_activity)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            }
        }))
    }

    /// `true` iff the token's session is `active` and unexpired. Tokens with
    /// no session row at all are treated as not revoked (the session service
    /// is optional infrastructure per the auth manager's design).
    pub async fn is_active(&self, token: &str) -> Result<bool> {
        match self.find_by_token(token).await? {
            Some(record) => Ok(record.status == SessionStatus::Active && record.expires_at > Utc::now()),
            None => Ok(true),
        }
    }

    /// Marks the session backing `token` revoked. Idempotent: revoking an
    /// already-revoked or nonexistent session is not an error.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let hash = token_hash(token);
        sqlx::query("UPDATE sessions SET status = ? WHERE token_hash = ? AND status = 'active'")
            .bind(SessionStatus::Revoked.as_str())
            .bind(&hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk-revokes every active session for `user_uuid`, optionally sparing
    /// `except_session` (used by "log out everywhere but here").
    pub async fn revoke_user_sessions(&self, user_uuid: Uuid, except_session: Option<Uuid>) -> Result<u64> {
        let result = match except_session {
            Some(except) => {
                sqlx::query(
                    "UPDATE sessions SET status = 'revoked' WHERE user_uuid = ? AND status = 'active' AND session_id != ?",
                )
                .bind(user_uuid.to_string())
                .bind(except.to_string())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE sessions SET status = 'revoked' WHERE user_uuid = ? AND status = 'active'")
                    .bind(user_uuid.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Lists sessions, optionally scoped to one user and optionally including
    /// already-expired/revoked rows. Surfaced by the administrative endpoint.
    pub async fn list_sessions(&self, user_uuid: Option<Uuid>, include_expired: bool) -> Result<Vec<SessionRecord>> {
        let rows: Vec<(String, String, String, String, String, String, String)> = match (user_uuid, include_expired) {
            (Some(uid), false) => {
                sqlx::query_as(
                    "SELECT session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity
                     FROM sessions WHERE user_uuid = ? AND status = 'active' ORDER BY created_at DESC",
                )
                .bind(uid.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            (Some(uid), true) => {
                sqlx::query_as(
                    "SELECT session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity
                     FROM sessions WHERE user_uuid = ? ORDER BY created_at DESC",
                )
                .bind(uid.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            (None, false) => {
                sqlx::query_as(
                    "SELECT session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity
                     FROM sessions WHERE status = 'active' ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query_as(
                    "SELECT session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity
                     FROM sessions ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(session_id, user_uuid, device_uuid, created_at, expires_at, status, last_activity)| SessionRecord {
                session_id: session_id.parse().unwrap_or_default(),
                user_uuid: user_uuid.parse().unwrap_or_default(),
                device_uuid,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                expires_at: DateTime::parse_from_rfc3339(&expires_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                status: SessionStatus::parse(&status),
                last_activity: DateTime::parse_from_rfc3339(&last_activity)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    /// Number of currently active sessions, for the gateway metrics endpoint.
    pub async fn active_session_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Deletes expired rows and purges revoked rows older than
    /// `cleanup_age_days`. Run periodically by a background task.
    pub async fn cleanup(&self) -> Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE sessions SET status = 'expired' WHERE status = 'active' AND expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let cutoff = now - chrono::Duration::days(self.config.cleanup_age_days);
        sqlx::query("DELETE FROM sessions WHERE status IN ('revoked', 'expired') AND expires_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_sqlite_pool;

    async fn service() -> SessionService {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        SessionService::new(pool, SessionConfig {
            database_url: "sqlite::memory:".to_string(),
            max_sessions_per_user: 10,
            cleanup_interval_hours: 24,
            cleanup_age_days: 30,
        })
    }

    #[tokio::test]
    async fn create_and_find_round_trips() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let session_id = svc
            .create_session(user, "device-1", "tok-abc", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();

        let record = svc.find_by_token("tok-abc").await.unwrap().expect("session found");
        assert_eq!(record.session_id, session_id);
        assert_eq!(record.status, SessionStatus::Active);
        assert!(svc.is_active("tok-abc").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_is_immediate_and_idempotent() {
        let svc = service().await;
        let user = Uuid::new_v4();
        svc.create_session(user, "device-1", "tok-xyz", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();

        svc.revoke_token("tok-xyz").await.unwrap();
        assert!(!svc.is_active("tok-xyz").await.unwrap());

        // Idempotent: revoking again is not an error.
        svc.revoke_token("tok-xyz").await.unwrap();
        assert!(!svc.is_active("tok-xyz").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_user_sessions_spares_excepted_session() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let kept = svc
            .create_session(user, "device-1", "tok-1", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();
        svc.create_session(user, "device-2", "tok-2", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();

        let revoked = svc.revoke_user_sessions(user, Some(kept)).await.unwrap();
        assert_eq!(revoked, 1);

        assert!(svc.is_active("tok-1").await.unwrap());
        assert!(!svc.is_active("tok-2").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_expires_and_purges_old_rows() {
        let svc = service().await;
        let user = Uuid::new_v4();
        svc.create_session(user, "device-1", "tok-expired", Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();

        svc.cleanup().await.unwrap();
        let record = svc.find_by_token("tok-expired").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Expired);
    }
}
