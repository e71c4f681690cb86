/// Session management
///
/// - `GET    /v1/sessions` - live sessions, the caller's marked `current`
/// - `DELETE /v1/sessions` - revoke every session except the current one
/// - `DELETE /v1/sessions/:id` - revoke one session

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, Client},
    routes::DataResponse,
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        session::{Session, SessionView},
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: u64,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<DataResponse<SessionView>>> {
    let data = Session::list_active(&state.db, auth.user_id)
        .await?
        .into_iter()
        .map(|s| s.into_view(auth.session_id))
        .collect();

    Ok(Json(DataResponse { data }))
}

pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
) -> ApiResult<Json<RevokedResponse>> {
    let revoked = Session::revoke_all_except(&state.db, auth.user_id, auth.session_id).await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::SessionRevokeOthers)
            .user(auth.user_id)
            .metadata(serde_json::json!({ "revoked": revoked }))
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(Json(RevokedResponse { revoked }))
}

/// Revokes one of the caller's sessions, possibly the current one
///
/// # Errors
///
/// - `404 Not Found`: Unknown, foreign or already revoked session
pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    client: Client,
) -> ApiResult<StatusCode> {
    if !Session::revoke(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Session"));
    }

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::SessionRevoke)
            .user(auth.user_id)
            .entity("session", id)
            .client(client.ip, client.user_agent),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
