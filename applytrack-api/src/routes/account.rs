/// The caller's own account
///
/// - `GET    /v1/account`
/// - `PATCH  /v1/account` - name, avatar_url (`null` clears)
/// - `DELETE /v1/account` - soft delete, signs out everywhere
/// - `POST   /v1/account/password` - change password, signs out other sessions
/// - `GET    /v1/account/email-preferences`
/// - `PUT    /v1/account/email-preferences`
/// - `GET    /v1/account/audit-log`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiQuery, Client, ValidatedJson},
    routes::auth::{check_password, hash_password, validate_new_password},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        email_preferences::{EmailPreferences, UpdateEmailPreferences},
        nullable,
        oauth_account::OAuthAccount,
        session::Session,
        user::{UpdateUser, User},
        Page, PageParams, Pagination,
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub user: User,

    pub has_password: bool,

    pub linked_providers: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(url(message = "Avatar must be a URL"), length(max = 2048))]
    pub avatar_url: Option<Option<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeleteAccountRequest {
    /// Required when the account has a password
    #[validate(length(max = 128))]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    /// Not needed for accounts created through OAuth
    #[validate(length(max = 128))]
    pub current_password: Option<String>,

    #[validate(length(max = 128, message = "Password must be at most 128 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailPreferencesRequest {
    pub interview_reminders: bool,
    pub task_reminders: bool,
    pub weekly_digest: bool,

    #[validate(range(min = 1, max = 168, message = "Lead time must be 1-168 hours"))]
    pub reminder_lead_hours: i32,
}

async fn current_user(state: &AppState, auth: &AuthContext) -> ApiResult<User> {
    User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))
}

async fn account_response(state: &AppState, user: User) -> ApiResult<AccountResponse> {
    let linked_providers = OAuthAccount::list_for_user(&state.db, user.id)
        .await?
        .into_iter()
        .map(|a| a.provider)
        .collect();

    Ok(AccountResponse {
        has_password: user.has_password(),
        user,
        linked_providers,
    })
}

pub async fn get_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<AccountResponse>> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(account_response(&state, user).await?))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    ValidatedJson(req): ValidatedJson<UpdateAccountRequest>,
) -> ApiResult<Json<AccountResponse>> {
    let mut changed = Vec::new();
    if req.name.is_some() {
        changed.push("name");
    }
    if req.avatar_url.is_some() {
        changed.push("avatar_url");
    }

    let user = User::update(
        &state.db,
        auth.user_id,
        UpdateUser {
            name: req.name.map(|n| n.map(|n| n.trim().to_string())),
            avatar_url: req.avatar_url,
        },
    )
    .await?
    .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::AccountUpdate)
            .user(user.id)
            .metadata(serde_json::json!({ "fields": changed }))
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(Json(account_response(&state, user).await?))
}

/// Soft-deletes the account and revokes every session
///
/// # Errors
///
/// - `403 Forbidden`: Password missing or wrong for a password account
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    ValidatedJson(req): ValidatedJson<DeleteAccountRequest>,
) -> ApiResult<StatusCode> {
    let user = current_user(&state, &auth).await?;

    if user.has_password() {
        let password = req
            .password
            .ok_or_else(|| ApiError::Forbidden("Password confirmation is required".to_string()))?;
        if !check_password(password, user.password_hash.clone()).await? {
            return Err(ApiError::Forbidden("Password is incorrect".to_string()));
        }
    }

    let mut tx = state.db.begin().await?;
    User::soft_delete(&mut *tx, user.id).await?;
    OAuthAccount::unlink_all(&mut *tx, user.id).await?;
    Session::revoke_all(&mut *tx, user.id).await?;
    tx.commit().await?;

    if user.subscription_status.as_deref() == Some("active") {
        tracing::warn!(user_id = %user.id, "Deleted account still has an active subscription");
    }

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::AccountDelete)
            .user(user.id)
            .client(client.ip, client.user_agent),
    )
    .await;

    tracing::info!(user_id = %user.id, "Account deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Changes the password and revokes every other session
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Wrong current password or weak new password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    let user = current_user(&state, &auth).await?;

    if user.has_password() {
        let current = req
            .current_password
            .ok_or_else(|| ApiError::field("current_password", "Current password is required"))?;
        if !check_password(current, user.password_hash.clone()).await? {
            return Err(ApiError::field("current_password", "Current password is incorrect"));
        }
    }

    validate_new_password("new_password", &req.new_password)?;
    let password_hash = hash_password(req.new_password).await?;

    let mut tx = state.db.begin().await?;
    User::set_password_hash(&mut *tx, user.id, &password_hash).await?;
    let revoked = Session::revoke_all_except(&mut *tx, user.id, auth.session_id).await?;
    tx.commit().await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordChange)
            .user(user.id)
            .metadata(serde_json::json!({ "sessions_revoked": revoked }))
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_email_preferences(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<EmailPreferences>> {
    Ok(Json(EmailPreferences::get(&state.db, auth.user_id).await?))
}

pub async fn update_email_preferences(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<EmailPreferencesRequest>,
) -> ApiResult<Json<EmailPreferences>> {
    let prefs = EmailPreferences::upsert(
        &state.db,
        auth.user_id,
        UpdateEmailPreferences {
            interview_reminders: req.interview_reminders,
            task_reminders: req.task_reminders,
            weekly_digest: req.weekly_digest,
            reminder_lead_hours: req.reminder_lead_hours,
        },
    )
    .await?;

    Ok(Json(prefs))
}

/// Latest audit entries for the caller, newest first
pub async fn audit_log(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Json<Page<AuditLog>>> {
    let pagination = Pagination::from(params);
    let (entries, total) = AuditLog::list_for_user(&state.db, auth.user_id, pagination).await?;

    Ok(Json(Page::new(entries, pagination, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let req: UpdateAccountRequest = serde_json::from_str(r#"{"avatar_url": null}"#).unwrap();
        assert_eq!(req.name, None);
        assert_eq!(req.avatar_url, Some(None));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_update_validates_present_values() {
        let req: UpdateAccountRequest =
            serde_json::from_str(r#"{"name": "", "avatar_url": "not a url"}"#).unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("avatar_url"));
    }

    #[test]
    fn test_lead_hours_range() {
        let prefs = |hours| EmailPreferencesRequest {
            interview_reminders: true,
            task_reminders: true,
            weekly_digest: false,
            reminder_lead_hours: hours,
        };
        assert!(prefs(24).validate().is_ok());
        assert!(prefs(0).validate().is_err());
        assert!(prefs(169).validate().is_err());
    }
}
