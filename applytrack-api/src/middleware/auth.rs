/// Session authentication middleware layer
///
/// Resolves the bearer session token and injects the caller's
/// [`AuthContext`] into request extensions for handlers and the rate
/// limiter. Missing, malformed, expired and revoked tokens all answer 401.

use applytrack_shared::auth::middleware::{authenticate, bearer_token};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{app::AppState, error::ApiError};

pub async fn session_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?.to_string();

    let auth = authenticate(&state.db, &token).await?;

    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}
