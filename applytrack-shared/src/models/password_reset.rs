/// Password reset tokens
///
/// Single-use, one hour lifetime, stored hashed. Issuing a new token
/// invalidates the user's previous unused ones.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::auth::session_token::{self, TokenKind};

/// Lifetime of a reset token
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    /// Issues a token and returns the plaintext for the email link
    pub async fn issue(pool: &PgPool, user_id: Uuid) -> Result<String, sqlx::Error> {
        let (token, token_hash) = session_token::generate(TokenKind::PasswordReset);
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE password_reset_tokens SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO password_reset_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(token)
    }

    /// Marks a valid token used and returns its user
    ///
    /// Runs inside the caller's transaction so the password change and the
    /// token consumption commit together. Returns `None` for unknown,
    /// expired or already used tokens.
    pub async fn consume(conn: &mut PgConnection, token: &str) -> Result<Option<Uuid>, sqlx::Error> {
        if !session_token::is_well_formed(token, TokenKind::PasswordReset) {
            return Ok(None);
        }

        let token_hash = session_token::hash_token(token);

        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE password_reset_tokens
            SET used_at = NOW()
            WHERE token_hash = $1 AND used_at IS NULL AND expires_at > NOW()
            RETURNING user_id
            "#,
        )
        .bind(token_hash)
        .fetch_optional(conn)
        .await
    }

    /// Deletes used and expired tokens
    pub async fn purge_stale(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM password_reset_tokens WHERE used_at IS NOT NULL OR expires_at < NOW()",
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
