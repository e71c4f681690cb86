/// OAuth sign-in with Google and GitHub
///
/// - `GET /v1/auth/oauth/:provider` - Consent URL with a signed `state`
/// - `GET /v1/auth/oauth/:provider/callback?code&state` - Sign in
///
/// Account resolution on callback, first match wins:
/// 1. a linked provider account
/// 2. a live user with the same (verified) email, which gets linked
/// 3. a new passwordless user with a verified email
///
/// Users with 2FA enabled get the same challenge as a password login.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, Client},
    routes::auth::{start_session, two_factor_challenge, LoginResponse},
};
use applytrack_shared::{
    auth::{
        jwt::{self, Claims, TokenPurpose},
        throttle::normalize_email,
    },
    models::{
        audit_log::{AuditAction, AuditEntry, AuditLog},
        email_preferences::EmailPreferences,
        oauth_account::OAuthAccount,
        user::{CreateUser, User},
    },
    oauth::{OAuthProfile, Provider},
};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn authorize(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
) -> ApiResult<Json<AuthorizeResponse>> {
    let provider: Provider = provider.parse()?;
    let client = state.oauth.get(provider)?;

    let claims = Claims::new(None, TokenPurpose::OAuthState).for_provider(provider.as_str());
    let state_token = jwt::create_token(&claims, state.jwt_secret())?;

    Ok(Json(AuthorizeResponse {
        url: client.authorize_url(&state_token),
    }))
}

/// Checks the `state` round-trip came from us for this provider
fn verify_state(token: &str, secret: &str, provider: Provider) -> ApiResult<()> {
    let claims = jwt::validate_token(token, secret, TokenPurpose::OAuthState)
        .map_err(|_| ApiError::BadRequest("Invalid or expired OAuth state".to_string()))?;

    if claims.provider.as_deref() != Some(provider.as_str()) {
        return Err(ApiError::BadRequest("OAuth state was issued for another provider".to_string()));
    }

    Ok(())
}

pub async fn callback(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
    client: Client,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> ApiResult<Json<LoginResponse>> {
    let provider: Provider = provider.parse()?;
    let oauth = state.oauth.get(provider)?;

    if let Some(error) = params.error {
        return Err(ApiError::BadRequest(format!("Sign-in was not completed: {}", error)));
    }

    let state_token = params
        .state
        .ok_or_else(|| ApiError::BadRequest("Missing OAuth state".to_string()))?;
    verify_state(&state_token, state.jwt_secret(), provider)?;

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;

    let profile = oauth.authenticate(&code).await?;
    let user = resolve_user(&state, &profile, &client).await?;

    if let Some(challenge) = two_factor_challenge(user.id, user.two_factor_enabled, state.jwt_secret())? {
        tracing::info!(user_id = %user.id, provider = provider.as_str(), "OAuth sign-in awaits 2FA code");
        return Ok(Json(challenge));
    }

    let session = start_session(&state, user, &client, AuditAction::Login).await?;
    Ok(Json(LoginResponse::Session(session)))
}

async fn resolve_user(state: &AppState, profile: &OAuthProfile, client: &Client) -> ApiResult<User> {
    let provider = profile.provider.as_str();

    if let Some(user_id) =
        OAuthAccount::find_user_id(&state.db, provider, &profile.provider_account_id).await?
    {
        return User::find_by_id(&state.db, user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()));
    }

    let email = profile
        .verified_email
        .as_deref()
        .map(normalize_email)
        .ok_or_else(|| {
            ApiError::field("email", format!("Your {} account has no verified email", provider))
        })?;

    if let Some(user) = User::find_by_email(&state.db, &email).await? {
        OAuthAccount::link(&state.db, user.id, provider, &profile.provider_account_id).await?;
        if !user.email_verified {
            User::mark_email_verified(&state.db, user.id).await?;
        }

        AuditLog::record(
            &state.db,
            AuditEntry::new(AuditAction::OAuthLink)
                .user(user.id)
                .metadata(serde_json::json!({ "provider": provider }))
                .client(client.ip.clone(), client.user_agent.clone()),
        )
        .await;

        tracing::info!(user_id = %user.id, provider, "Linked OAuth account to existing user");
        return Ok(user);
    }

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            email,
            password_hash: None,
            name: profile.name.clone(),
            avatar_url: profile.avatar_url.clone(),
            email_verified: true,
        },
    )
    .await?;
    EmailPreferences::create_default(&mut *tx, user.id).await?;
    OAuthAccount::link(&mut *tx, user.id, provider, &profile.provider_account_id).await?;

    tx.commit().await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::Register)
            .user(user.id)
            .metadata(serde_json::json!({ "provider": provider }))
            .client(client.ip.clone(), client.user_agent.clone()),
    )
    .await;

    tracing::info!(user_id = %user.id, provider, "User registered via OAuth");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn state_for(provider: &str) -> String {
        let claims = Claims::new(None, TokenPurpose::OAuthState).for_provider(provider);
        jwt::create_token(&claims, SECRET).unwrap()
    }

    #[test]
    fn test_verify_state() {
        assert!(verify_state(&state_for("github"), SECRET, Provider::GitHub).is_ok());
    }

    #[test]
    fn test_verify_state_rejects_other_provider() {
        let err = verify_state(&state_for("google"), SECRET, Provider::GitHub).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_verify_state_rejects_challenge_token() {
        let challenge = jwt::create_token(
            &Claims::new(Some(uuid::Uuid::new_v4()), TokenPurpose::TwoFactorChallenge),
            SECRET,
        )
        .unwrap();

        assert!(verify_state(&challenge, SECRET, Provider::Google).is_err());
        assert!(verify_state("garbage", SECRET, Provider::Google).is_err());
    }

    #[test]
    fn test_two_factor_user_gets_challenge() {
        let user_id = uuid::Uuid::new_v4();

        let challenge = match two_factor_challenge(user_id, true, SECRET).unwrap() {
            Some(LoginResponse::Challenge { challenge_token, .. }) => challenge_token,
            other => panic!("unexpected response: {:?}", other),
        };

        let claims = jwt::validate_token(&challenge, SECRET, TokenPurpose::TwoFactorChallenge).unwrap();
        assert_eq!(claims.sub, Some(user_id));
        assert!(two_factor_challenge(user_id, false, SECRET).unwrap().is_none());
    }
}
