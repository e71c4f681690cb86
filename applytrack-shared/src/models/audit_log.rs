/// Append-only audit trail of security and account events
///
/// Writes are best effort: [`AuditLog::record`] logs failures and never
/// propagates them, so auditing can't fail the request it describes.
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::models::audit_log::{AuditAction, AuditEntry, AuditLog};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) {
/// AuditLog::record(&pool, AuditEntry::new(AuditAction::Login).user(user_id)).await;
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::Pagination;

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    LoginFailed,
    Logout,
    PasswordChange,
    PasswordResetRequest,
    PasswordReset,
    TwoFactorEnable,
    TwoFactorDisable,
    SessionRevoke,
    SessionRevokeOthers,
    AccountUpdate,
    AccountDelete,
    OAuthLink,
    PlanChange,
    CsvImport,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::PasswordChange => "password_change",
            AuditAction::PasswordResetRequest => "password_reset_request",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::TwoFactorEnable => "two_factor_enable",
            AuditAction::TwoFactorDisable => "two_factor_disable",
            AuditAction::SessionRevoke => "session_revoke",
            AuditAction::SessionRevokeOthers => "session_revoke_others",
            AuditAction::AccountUpdate => "account_update",
            AuditAction::AccountDelete => "account_delete",
            AuditAction::OAuthLink => "oauth_link",
            AuditAction::PlanChange => "plan_change",
            AuditAction::CsvImport => "csv_import",
        }
    }
}

/// Entry to append, built fluently
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            entity_type: None,
            entity_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn entity(mut self, entity_type: &'static str, entity_id: Uuid) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(entity_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent.map(|ua| ua.chars().take(512).collect());
        self
    }
}

/// Stored audit entry
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    /// Appends an entry, logging instead of failing on error
    pub async fn record(pool: &PgPool, entry: AuditEntry) {
        let action = entry.action.as_str();

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, entity_type, entity_id, metadata, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.user_id)
        .bind(action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.metadata)
        .bind(entry.ip_address)
        .bind(entry.user_agent)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(action, user_id = ?entry.user_id, error = %e, "Failed to write audit log");
        }
    }

    /// Lists the user's entries, newest first
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let entries = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, user_id, action, entity_type, entity_id, metadata, ip_address, user_agent, created_at
            FROM audit_logs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        Ok((entries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(AuditAction::LoginFailed.as_str(), "login_failed");
        assert_eq!(AuditAction::TwoFactorEnable.as_str(), "two_factor_enable");
        assert_eq!(AuditAction::OAuthLink.as_str(), "oauth_link");
    }

    #[test]
    fn test_entry_builder() {
        let user_id = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let entry = AuditEntry::new(AuditAction::SessionRevoke)
            .user(user_id)
            .entity("session", entity_id)
            .metadata(serde_json::json!({ "reason": "user" }))
            .client(Some("10.0.0.1".to_string()), Some("x".repeat(600)));

        assert_eq!(entry.user_id, Some(user_id));
        assert_eq!(entry.entity_type, Some("session"));
        assert_eq!(entry.entity_id, Some(entity_id));
        assert_eq!(entry.metadata["reason"], "user");
        assert_eq!(entry.user_agent.map(|ua| ua.len()), Some(512));
    }
}
