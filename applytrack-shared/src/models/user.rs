/// User model and database operations
///
/// A user is also the tenant: every other resource hangs off `users.id`.
/// Accounts are soft-deleted; a deleted account frees its email address and
/// can no longer authenticate.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(320) NOT NULL UNIQUE,
///     email_verified BOOLEAN NOT NULL DEFAULT FALSE,
///     password_hash VARCHAR(255),
///     name VARCHAR(255),
///     avatar_url VARCHAR(1024),
///     plan TEXT NOT NULL DEFAULT 'FREE',
///     stripe_customer_id VARCHAR(255) UNIQUE,
///     stripe_subscription_id VARCHAR(255),
///     subscription_status VARCHAR(32),
///     current_period_end TIMESTAMPTZ,
///     two_factor_enabled BOOLEAN NOT NULL DEFAULT FALSE,
///     two_factor_secret VARCHAR(64),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ,
///     deleted_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, QueryBuilder};
use uuid::Uuid;

use crate::plan::Plan;

const COLUMNS: &str = "id, email, email_verified, password_hash, name, avatar_url, plan, \
     stripe_customer_id, stripe_subscription_id, subscription_status, current_period_end, \
     two_factor_enabled, two_factor_secret, created_at, updated_at, last_login_at, deleted_at";

/// User account
///
/// `password_hash` is `None` for accounts created through OAuth.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Lowercased email address
    pub email: String,

    pub email_verified: bool,

    /// Argon2id PHC string, never serialized
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub name: Option<String>,

    pub avatar_url: Option<String>,

    pub plan: Plan,

    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,

    #[serde(skip_serializing)]
    pub stripe_subscription_id: Option<String>,

    pub subscription_status: Option<String>,

    pub current_period_end: Option<DateTime<Utc>>,

    pub two_factor_enabled: bool,

    /// Base32 TOTP secret; set but not yet enabled while setup is pending
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct CreateUser {
    /// Normalized (trimmed, lowercased) email
    pub email: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

/// Profile changes; `Some(None)` clears a nullable field
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub name: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
}

/// Subscription state written by billing webhooks
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub plan: Plan,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl User {
    /// Creates a new user on the FREE plan
    ///
    /// # Errors
    ///
    /// Returns a unique violation when the email is taken.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "INSERT INTO users (email, password_hash, name, avatar_url, email_verified) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(data.email)
            .bind(data.password_hash)
            .bind(data.name)
            .bind(data.avatar_url)
            .bind(data.email_verified)
            .fetch_one(executor)
            .await
    }

    /// Finds a live user by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL", COLUMNS);

        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a live user by email, case-insensitively
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users WHERE email = lower(trim($1)) AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    /// Finds the user owning a payment-provider customer id
    pub async fn find_by_stripe_customer(
        pool: &PgPool,
        customer_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users WHERE stripe_customer_id = $1 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(customer_id)
            .fetch_optional(pool)
            .await
    }

    /// Applies a profile update
    ///
    /// Returns `None` if the user doesn't exist or is deleted.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE users SET updated_at = NOW()");

        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(avatar_url) = data.avatar_url {
            query.push(", avatar_url = ").push_bind(avatar_url);
        }

        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND deleted_at IS NULL RETURNING ")
            .push(COLUMNS);

        query.build_query_as::<User>().fetch_optional(pool).await
    }

    /// Replaces the password hash
    pub async fn set_password_hash<'e, E>(
        executor: E,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(password_hash)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks the email address verified (OAuth providers vouch for it)
    pub async fn mark_email_verified(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Updates the last login timestamp
    pub async fn update_last_login(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores a pending TOTP secret, leaving 2FA disabled until confirmed
    pub async fn set_pending_two_factor(
        pool: &PgPool,
        id: Uuid,
        secret: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET two_factor_secret = $2, two_factor_enabled = FALSE, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(secret)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Turns on 2FA for the stored secret
    pub async fn enable_two_factor(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET two_factor_enabled = TRUE, updated_at = NOW() \
             WHERE id = $1 AND two_factor_secret IS NOT NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Turns off 2FA and forgets the secret
    pub async fn disable_two_factor(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET two_factor_enabled = FALSE, two_factor_secret = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Records the payment-provider customer id
    pub async fn set_stripe_customer(
        pool: &PgPool,
        id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Writes subscription state and plan
    pub async fn apply_subscription(
        pool: &PgPool,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET plan = $2,
                stripe_subscription_id = $3,
                subscription_status = $4,
                current_period_end = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.plan)
        .bind(update.subscription_id)
        .bind(update.status)
        .bind(update.current_period_end)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sets only the subscription status (payment failures)
    pub async fn set_subscription_status(
        pool: &PgPool,
        id: Uuid,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET subscription_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Soft-deletes the account
    ///
    /// The email is rewritten so the address can register again; the
    /// original row stays for audit purposes until a hard purge.
    pub async fn soft_delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NOW(),
                email = 'deleted+' || id::text || '@deleted.invalid',
                password_hash = NULL,
                two_factor_enabled = FALSE,
                two_factor_secret = NULL,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether the account can sign in with a password
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            email_verified: false,
            password_hash: Some("$argon2id$v=19$secret".to_string()),
            name: Some("Jane".to_string()),
            avatar_url: None,
            plan: Plan::Free,
            stripe_customer_id: Some("cus_123".to_string()),
            stripe_subscription_id: None,
            subscription_status: None,
            current_period_end: None,
            two_factor_enabled: false,
            two_factor_secret: Some("JBSWY3DPEHPK3PXP".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_secrets_not_serialized() {
        let json = serde_json::to_value(sample_user()).unwrap();

        assert!(json.get("password_hash").is_none());
        assert!(json.get("two_factor_secret").is_none());
        assert!(json.get("stripe_customer_id").is_none());
        assert_eq!(json["plan"], "FREE");
        assert_eq!(json["email"], "jane@example.com");
    }

    #[test]
    fn test_has_password() {
        let mut user = sample_user();
        assert!(user.has_password());

        user.password_hash = None;
        assert!(!user.has_password());
    }

    #[test]
    fn test_update_user_default() {
        let update = UpdateUser::default();
        assert!(update.name.is_none());
        assert!(update.avatar_url.is_none());
    }
}
