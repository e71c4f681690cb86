/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Register and start a session
/// - `POST /v1/auth/login` - Password login, may return a 2FA challenge
/// - `POST /v1/auth/logout` - Revoke the current session
/// - `POST /v1/auth/password/forgot` - Email a reset link (always 202)
/// - `POST /v1/auth/password/reset` - Set a new password from a reset token

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{Client, ValidatedJson},
    middleware::rate_limit::{exceeded, RateLimit, FORGOT_PASSWORD_PER_MINUTE},
};
use applytrack_shared::{
    auth::{
        jwt::{self, Claims, TokenPurpose},
        middleware::AuthContext,
        password,
        throttle::{normalize_email, LoginThrottle, ThrottleKey},
    },
    mail::templates,
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        email_preferences::EmailPreferences,
        password_reset::PasswordResetToken,
        session::Session,
        user::{CreateUser, User},
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked for strength separately
    #[validate(length(max = 128, message = "Password must be at most 128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, max = 256, message = "Token is required"))]
    pub token: String,

    #[validate(length(max = 128, message = "Password must be at most 128 characters"))]
    pub new_password: String,
}

/// A freshly created session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Bearer token, shown only once
    pub token: String,

    pub expires_at: DateTime<Utc>,

    pub user: User,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Session(SessionResponse),
    Challenge {
        two_factor_required: bool,
        challenge_token: String,
    },
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Hashes on the blocking thread pool
pub(crate) async fn hash_password(plain: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| ApiError::InternalError(format!("Hashing task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Verifies a password against an optional hash
///
/// Missing users and OAuth-only users are checked against a dummy hash.
pub(crate) async fn check_password(plain: String, hash: Option<String>) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => password::verify_password(&plain, &hash),
        None => {
            password::verify_against_dummy(&plain);
            Ok(false)
        }
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("Hashing task failed: {}", e)))?
    .map_err(ApiError::from)
}

pub(crate) fn validate_new_password(field: &str, plain: &str) -> ApiResult<()> {
    password::validate_password_strength(plain).map_err(|msg| ApiError::field(field, msg))
}

/// Challenge for a user who still owes a TOTP code, `None` otherwise
pub(crate) fn two_factor_challenge(
    user_id: Uuid,
    two_factor_enabled: bool,
    secret: &str,
) -> ApiResult<Option<LoginResponse>> {
    if !two_factor_enabled {
        return Ok(None);
    }

    let claims = Claims::new(Some(user_id), TokenPurpose::TwoFactorChallenge);
    let challenge_token = jwt::create_token(&claims, secret)?;

    Ok(Some(LoginResponse::Challenge {
        two_factor_required: true,
        challenge_token,
    }))
}

/// Settles the throttle key after a correct password
///
/// The key is only cleared when the password completes the login. For 2FA
/// users it keeps counting until a code is accepted.
pub(crate) fn password_accepted(
    throttle: &LoginThrottle,
    key: &ThrottleKey,
    user_id: Uuid,
    two_factor_enabled: bool,
    secret: &str,
) -> ApiResult<Option<LoginResponse>> {
    let challenge = two_factor_challenge(user_id, two_factor_enabled, secret)?;
    if challenge.is_none() {
        throttle.record_success(key);
    }
    Ok(challenge)
}

/// Creates a session for a user who has passed every login step
pub(crate) async fn start_session(
    state: &AppState,
    user: User,
    client: &Client,
    action: AuditAction,
) -> ApiResult<SessionResponse> {
    let (session, token) =
        Session::create(&state.db, user.id, &client.meta(), state.config.session_ttl()).await?;

    if let Err(e) = User::update_last_login(&state.db, user.id).await {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to update last login");
    }

    AuditLog::record(
        &state.db,
        AuditEntry::new(action)
            .user(user.id)
            .entity("session", session.id)
            .client(client.ip.clone(), client.user_agent.clone()),
    )
    .await;

    tracing::info!(user_id = %user.id, session_id = %session.id, "Session started");

    Ok(SessionResponse {
        token,
        expires_at: session.expires_at,
        user,
    })
}

/// Registers a user on the FREE plan and signs them in
///
/// # Errors
///
/// - `409 Conflict`: Email already registered
/// - `422 Unprocessable Entity`: Invalid email or weak password
pub async fn register(
    State(state): State<AppState>,
    client: Client,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    validate_new_password("password", &req.password)?;
    let password_hash = hash_password(req.password).await?;

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            email: normalize_email(&req.email),
            password_hash: Some(password_hash),
            name: req.name.map(|n| n.trim().to_string()),
            avatar_url: None,
            email_verified: false,
        },
    )
    .await?;

    EmailPreferences::create_default(&mut *tx, user.id).await?;

    let (session, token) =
        Session::create(&mut *tx, user.id, &client.meta(), state.config.session_ttl()).await?;

    tx.commit().await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::Register)
            .user(user.id)
            .client(client.ip.clone(), client.user_agent.clone()),
    )
    .await;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

/// Password login
///
/// Locked-out (ip, email) pairs get 429 before the password is checked.
/// Unknown emails and wrong passwords both count as failures. A 2FA user's
/// failures carry over into the code step.
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid credentials
/// - `429 Too Many Requests`: Too many failed attempts
pub async fn login(
    State(state): State<AppState>,
    client: Client,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let key = ThrottleKey::new(client.ip_or_unknown(), &req.email);
    state.throttle.check(&key, Instant::now())?;

    let user = User::find_by_email(&state.db, &normalize_email(&req.email)).await?;
    let hash = user.as_ref().and_then(|u| u.password_hash.clone());

    let valid = check_password(req.password, hash).await?;

    let user = match user {
        Some(user) if valid => user,
        user => {
            let lockout = state.throttle.record_failure(&key, Instant::now());

            let mut entry = AuditEntry::new(AuditAction::LoginFailed)
                .client(client.ip.clone(), client.user_agent.clone());
            if let Some(user) = &user {
                entry = entry.user(user.id);
            }
            AuditLog::record(&state.db, entry).await;

            if let Some(duration) = lockout {
                tracing::warn!(ip = %client.ip_or_unknown(), lockout_secs = duration.as_secs(), "Login locked out");
            }

            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
    };

    if let Some(challenge) = password_accepted(
        &state.throttle,
        &key,
        user.id,
        user.two_factor_enabled,
        state.jwt_secret(),
    )? {
        return Ok(Json(challenge));
    }

    let session = start_session(&state, user, &client, AuditAction::Login).await?;
    Ok(Json(LoginResponse::Session(session)))
}

/// Revokes the session used for this request
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
) -> ApiResult<StatusCode> {
    Session::revoke(&state.db, auth.user_id, auth.session_id).await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::Logout)
            .user(auth.user_id)
            .entity("session", auth.session_id)
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Emails a password reset link when the account exists
///
/// Always answers 202 so the response doesn't reveal registered emails.
/// Limited per client IP.
pub async fn forgot_password(
    State(state): State<AppState>,
    client: Client,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let key = format!("ratelimit:ip:{}:forgot", client.ip_or_unknown());
    let limit = state
        .rate_limiter
        .check(&key, RateLimit::per_minute(FORGOT_PASSWORD_PER_MINUTE))
        .await;
    if !limit.ok {
        return Err(exceeded(limit));
    }

    let accepted = (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If an account exists for this email, a reset link has been sent",
        }),
    );

    let Some(user) = User::find_by_email(&state.db, &normalize_email(&req.email)).await? else {
        return Ok(accepted);
    };

    let token = PasswordResetToken::issue(&state.db, user.id).await?;
    let email = templates::password_reset(
        &user.email,
        user.name.as_deref(),
        &state.config.reset_url(&token),
    );

    // off the request path
    let mailer = state.mailer.clone();
    let user_id = user.id;
    tokio::spawn(async move {
        if let Err(e) = mailer.send(email).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to send password reset email");
        }
    });

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordResetRequest)
            .user(user.id)
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(accepted)
}

/// Sets a new password from a reset token and signs out every session
///
/// # Errors
///
/// - `400 Bad Request`: Unknown, expired or already used token
/// - `422 Unprocessable Entity`: Weak password
pub async fn reset_password(
    State(state): State<AppState>,
    client: Client,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> ApiResult<StatusCode> {
    validate_new_password("new_password", &req.new_password)?;
    let password_hash = hash_password(req.new_password).await?;

    let mut tx = state.db.begin().await?;

    let user_id = PasswordResetToken::consume(&mut tx, &req.token)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired reset token".to_string()))?;

    if !User::set_password_hash(&mut *tx, user_id, &password_hash).await? {
        return Err(ApiError::BadRequest("Invalid or expired reset token".to_string()));
    }
    let revoked = Session::revoke_all(&mut *tx, user_id).await?;

    tx.commit().await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordReset)
            .user(user_id)
            .metadata(serde_json::json!({ "sessions_revoked": revoked }))
            .client(client.ip, client.user_agent),
    )
    .await;

    tracing::info!(user_id = %user_id, sessions_revoked = revoked, "Password reset");

    Ok(StatusCode::NO_CONTENT)
}
