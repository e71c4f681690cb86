/// User sessions
///
/// A session is created on every successful sign-in and identified by an
/// opaque bearer token (see [`crate::auth::session_token`]). Only the token's
/// SHA-256 is stored. Sessions expire after a fixed lifetime and can be
/// revoked individually or in bulk.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE user_sessions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     token_hash VARCHAR(64) NOT NULL UNIQUE,
///     ip_address VARCHAR(64),
///     user_agent VARCHAR(512),
///     device_type TEXT NOT NULL DEFAULT 'unknown',
///     browser VARCHAR(64),
///     os VARCHAR(64),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_active_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     expires_at TIMESTAMPTZ NOT NULL,
///     revoked_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::auth::session_token::{self, TokenKind};
use crate::auth::user_agent::{self, DeviceType};
use crate::plan::Plan;

/// Default session lifetime in days
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Minimum interval between `last_active_at` writes
pub const TOUCH_INTERVAL_SECONDS: i64 = 60;

const COLUMNS: &str = "id, user_id, token_hash, ip_address, user_agent, device_type, browser, os, \
     created_at, last_active_at, expires_at, revoked_at";

/// Stored session
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: DeviceType,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Request metadata captured at sign-in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Validated session joined with its owner
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub plan: Plan,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Session as listed to its owner
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub current: bool,
}

/// Whether `last_active_at` is stale enough to rewrite
pub fn needs_touch(last_active_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_active_at >= Duration::seconds(TOUCH_INTERVAL_SECONDS)
}

impl Session {
    /// Creates a session and returns it with the plaintext token
    ///
    /// The token is returned exactly once; only its hash is stored.
    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        meta: &ClientMeta,
        ttl: Duration,
    ) -> Result<(Self, String), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (token, token_hash) = session_token::generate(TokenKind::Session);
        let client = user_agent::parse(meta.user_agent.as_deref().unwrap_or(""));
        let expires_at = Utc::now() + ttl;

        let sql = format!(
            "INSERT INTO user_sessions \
             (user_id, token_hash, ip_address, user_agent, device_type, browser, os, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            COLUMNS
        );

        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(meta.ip_address.as_deref())
            .bind(meta.user_agent.as_deref().map(|ua| truncate(ua, 512)))
            .bind(client.device_type)
            .bind(client.browser)
            .bind(client.os)
            .bind(expires_at)
            .fetch_one(executor)
            .await?;

        Ok((session, token))
    }

    /// Resolves a bearer token to a live session
    ///
    /// Returns `None` for malformed, unknown, expired or revoked tokens and
    /// for deleted users.
    pub async fn validate(pool: &PgPool, token: &str) -> Result<Option<ActiveSession>, sqlx::Error> {
        if !session_token::is_well_formed(token, TokenKind::Session) {
            return Ok(None);
        }

        let token_hash = session_token::hash_token(token);

        sqlx::query_as::<_, ActiveSession>(
            r#"
            SELECT s.id AS session_id, s.user_id, u.email, u.plan,
                   s.last_active_at, s.expires_at
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1
              AND s.revoked_at IS NULL
              AND s.expires_at > NOW()
              AND u.deleted_at IS NULL
            "#,
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await
    }

    /// Bumps `last_active_at`, at most once per minute
    pub async fn touch(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE user_sessions SET last_active_at = NOW() \
             WHERE id = $1 AND last_active_at < NOW() - make_interval(secs => $2)",
        )
        .bind(id)
        .bind(TOUCH_INTERVAL_SECONDS as f64)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Lists the user's live sessions, most recently active first
    pub async fn list_active(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM user_sessions \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW() \
             ORDER BY last_active_at DESC",
            COLUMNS
        );

        sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Revokes one of the user's sessions
    ///
    /// Returns false when the session doesn't exist, belongs to someone
    /// else or is already revoked.
    pub async fn revoke(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET revoked_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revokes every session of the user except `keep`
    pub async fn revoke_all_except<'e, E>(
        executor: E,
        user_id: Uuid,
        keep: Uuid,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE user_sessions SET revoked_at = NOW() \
             WHERE user_id = $1 AND id <> $2 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(keep)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Revokes every session of the user
    pub async fn revoke_all<'e, E>(executor: E, user_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE user_sessions SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes sessions that expired or were revoked before `retention` ago
    pub async fn purge_stale(pool: &PgPool, retention: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - retention;

        let result = sqlx::query(
            "DELETE FROM user_sessions WHERE expires_at < $1 OR revoked_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks which listed session is the caller's
    pub fn into_view(self, current_session_id: Uuid) -> SessionView {
        let current = self.id == current_session_id;
        SessionView {
            session: self,
            current,
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: Uuid) -> Session {
        let now = Utc::now();
        Session {
            id,
            user_id: Uuid::new_v4(),
            token_hash: "ab".repeat(32),
            ip_address: Some("203.0.113.4".to_string()),
            user_agent: None,
            device_type: DeviceType::Desktop,
            browser: Some("Firefox 121".to_string()),
            os: Some("Linux".to_string()),
            created_at: now,
            last_active_at: now,
            expires_at: now + Duration::days(DEFAULT_TTL_DAYS),
            revoked_at: None,
        }
    }

    #[test]
    fn test_needs_touch() {
        let now = Utc::now();
        assert!(!needs_touch(now, now));
        assert!(!needs_touch(now - Duration::seconds(59), now));
        assert!(needs_touch(now - Duration::seconds(60), now));
        assert!(needs_touch(now - Duration::hours(3), now));
    }

    #[test]
    fn test_view_marks_current() {
        let id = Uuid::new_v4();
        assert!(sample(id).into_view(id).current);
        assert!(!sample(id).into_view(Uuid::new_v4()).current);
    }

    #[test]
    fn test_view_hides_token_hash() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(sample(id).into_view(id)).unwrap();

        assert!(json.get("token_hash").is_none());
        assert_eq!(json["current"], true);
        assert_eq!(json["device_type"], "desktop");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
