/// Identity-provider accounts linked to users

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OAuthAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_account_id: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthAccount {
    /// Finds the live user linked to a provider account
    pub async fn find_user_id(
        pool: &PgPool,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT o.user_id
            FROM oauth_accounts o
            JOIN users u ON u.id = o.user_id
            WHERE o.provider = $1 AND o.provider_account_id = $2 AND u.deleted_at IS NULL
            "#,
        )
        .bind(provider)
        .bind(provider_account_id)
        .fetch_optional(pool)
        .await
    }

    /// Links a provider account to a user
    pub async fn link<'e, E>(
        executor: E,
        user_id: Uuid,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OAuthAccount>(
            r#"
            INSERT INTO oauth_accounts (user_id, provider, provider_account_id)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, provider, provider_account_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(provider_account_id)
        .fetch_one(executor)
        .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OAuthAccount>(
            "SELECT id, user_id, provider, provider_account_id, created_at \
             FROM oauth_accounts WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Removes every link so the provider accounts can sign up again
    pub async fn unlink_all<'e, E>(executor: E, user_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM oauth_accounts WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }
}
