/// Session authentication for Axum
///
/// Resolves the `Authorization: Bearer <session token>` header to a live
/// session and exposes the caller as an [`AuthContext`] request extension.
///
/// # Example
///
/// ```no_run
/// use axum::Extension;
/// use applytrack_shared::auth::middleware::AuthContext;
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("User: {}", auth.user_id)
/// }
/// ```

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::session::{needs_touch, Session};
use crate::plan::Plan;

/// Authenticated caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,

    /// Session the request was made with
    pub session_id: Uuid,

    pub email: String,

    pub plan: Plan,
}

/// Error type for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Session lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            other => (StatusCode::UNAUTHORIZED, "unauthorized", other.to_string()),
        };

        (status, Json(serde_json::json!({ "code": code, "message": message }))).into_response()
    }
}

/// Extracts the bearer token from request headers
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?;

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    Ok(token)
}

/// Validates a session token and refreshes its activity timestamp
pub async fn authenticate(pool: &PgPool, token: &str) -> Result<AuthContext, AuthError> {
    let session = Session::validate(pool, token)
        .await?
        .ok_or(AuthError::InvalidSession)?;

    if needs_touch(session.last_active_at, Utc::now()) {
        // activity tracking must not fail the request
        if let Err(e) = Session::touch(pool, session.session_id).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Failed to touch session");
        }
    }

    Ok(AuthContext {
        user_id: session.user_id,
        session_id: session.session_id,
        email: session.email,
        plan: session.plan,
    })
}
