/// TOTP two-factor authentication endpoints
///
/// - `POST /v1/auth/2fa/setup` - Store a pending secret, return the otpauth URL
/// - `POST /v1/auth/2fa/enable` - Confirm the pending secret with a code
/// - `POST /v1/auth/2fa/disable` - Turn 2FA off (password or code required)
/// - `POST /v1/auth/2fa/verify` - Exchange a login challenge + code for a session

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{Client, ValidatedJson},
    routes::auth::{check_password, start_session, SessionResponse},
};
use applytrack_shared::{
    auth::{
        jwt::{self, TokenPurpose},
        middleware::AuthContext,
        throttle::ThrottleKey,
        totp,
    },
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        user::User,
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::{Validate, ValidationError};

fn six_digits(code: &str) -> Result<(), ValidationError> {
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("code");
        err.message = Some("Code must be 6 digits".into());
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CodeRequest {
    #[validate(custom(function = "six_digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DisableRequest {
    #[validate(length(min = 1, max = 128))]
    pub password: Option<String>,

    #[validate(custom(function = "six_digits"))]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 1, message = "Challenge token is required"))]
    pub challenge_token: String,

    #[validate(custom(function = "six_digits"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub otpauth_url: String,
}

async fn current_user(state: &AppState, auth: &AuthContext) -> ApiResult<User> {
    User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))
}

/// Starts setup; 2FA stays off until [`enable`] confirms a code
pub async fn setup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<SetupResponse>> {
    let user = current_user(&state, &auth).await?;
    if user.two_factor_enabled {
        return Err(ApiError::Conflict(
            "Two-factor authentication is already enabled".to_string(),
        ));
    }

    let secret = totp::generate_secret();
    User::set_pending_two_factor(&state.db, user.id, &secret).await?;

    Ok(Json(SetupResponse {
        otpauth_url: totp::provisioning_url(&secret, &user.email),
        secret,
    }))
}

pub async fn enable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    ValidatedJson(req): ValidatedJson<CodeRequest>,
) -> ApiResult<StatusCode> {
    let user = current_user(&state, &auth).await?;
    if user.two_factor_enabled {
        return Err(ApiError::Conflict(
            "Two-factor authentication is already enabled".to_string(),
        ));
    }

    let secret = user
        .two_factor_secret
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Start two-factor setup first".to_string()))?;

    if !totp::verify_code_now(secret, &req.code)? {
        return Err(ApiError::field("code", "Invalid verification code"));
    }

    User::enable_two_factor(&state.db, user.id).await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::TwoFactorEnable)
            .user(user.id)
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Turns 2FA off after re-checking the password or a current code
pub async fn disable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    ValidatedJson(req): ValidatedJson<DisableRequest>,
) -> ApiResult<StatusCode> {
    let user = current_user(&state, &auth).await?;
    if !user.two_factor_enabled {
        return Err(ApiError::BadRequest(
            "Two-factor authentication is not enabled".to_string(),
        ));
    }

    let confirmed = match (&req.password, &req.code, &user.two_factor_secret) {
        (Some(password), _, _) => check_password(password.clone(), user.password_hash.clone()).await?,
        (None, Some(code), Some(secret)) => totp::verify_code_now(secret, code)?,
        (None, Some(_), None) => false,
        (None, None, _) => {
            return Err(ApiError::field("password", "Password or code is required"));
        }
    };

    if !confirmed {
        return Err(ApiError::Forbidden("Invalid password or code".to_string()));
    }

    User::disable_two_factor(&state.db, user.id).await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::TwoFactorDisable)
            .user(user.id)
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Second login step
///
/// Wrong codes count against the same (ip, email) throttle as passwords.
///
/// # Errors
///
/// - `401 Unauthorized`: Bad or expired challenge, wrong code
/// - `429 Too Many Requests`: Too many failed attempts
pub async fn verify(
    State(state): State<AppState>,
    client: Client,
    ValidatedJson(req): ValidatedJson<VerifyRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let claims = jwt::validate_token(
        &req.challenge_token,
        state.jwt_secret(),
        TokenPurpose::TwoFactorChallenge,
    )?;
    let user_id = claims
        .sub
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

    let key = ThrottleKey::new(client.ip_or_unknown(), &user.email);
    state.throttle.check(&key, Instant::now())?;

    let valid = match (&user.two_factor_secret, user.two_factor_enabled) {
        (Some(secret), true) => totp::verify_code_now(secret, &req.code)?,
        _ => false,
    };

    if !valid {
        state.throttle.record_failure(&key, Instant::now());
        AuditLog::record(
            &state.db,
            AuditEntry::new(AuditAction::LoginFailed)
                .user(user.id)
                .metadata(serde_json::json!({ "step": "two_factor" }))
                .client(client.ip.clone(), client.user_agent.clone()),
        )
        .await;

        return Err(ApiError::Unauthorized("Invalid verification code".to_string()));
    }

    state.throttle.record_success(&key);

    let session = start_session(&state, user, &client, AuditAction::Login).await?;
    Ok(Json(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_validation() {
        assert!(CodeRequest { code: "123456".to_string() }.validate().is_ok());
        assert!(CodeRequest { code: "12345".to_string() }.validate().is_err());
        assert!(CodeRequest { code: "12345a".to_string() }.validate().is_err());
    }

    #[test]
    fn test_disable_request_optional_fields() {
        let req = DisableRequest {
            password: None,
            code: None,
        };
        assert!(req.validate().is_ok());

        let req = DisableRequest {
            password: None,
            code: Some("abc".to_string()),
        };
        assert!(req.validate().unwrap_err().field_errors().contains_key("code"));
    }
}
