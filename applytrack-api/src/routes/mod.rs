/// API route handlers, one module per resource
///
/// - `health`: liveness and database check
/// - `auth`: register, login, logout, password reset
/// - `two_factor`: TOTP setup and login challenge
/// - `oauth`: Google and GitHub sign-in
/// - `account`, `sessions`: the caller's profile, preferences and sessions
/// - `applications`, `interviews`, `tasks`, `contacts`, `documents`, `labels`
/// - `dashboard`: analytics
/// - `billing`: subscription and provider webhook

pub mod account;
pub mod applications;
pub mod auth;
pub mod billing;
pub mod contacts;
pub mod dashboard;
pub mod documents;
pub mod health;
pub mod interviews;
pub mod labels;
pub mod oauth;
pub mod sessions;
pub mod tasks;
pub mod two_factor;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use applytrack_shared::models::{owns_all, Owned};
use serde::Serialize;
use uuid::Uuid;

/// Unpaginated list body
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: Vec<T>,
}

/// Trims free text, mapping blank input to `None`
pub(crate) fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Rejects references to rows the caller doesn't own with a 422 on `field`
pub(crate) async fn ensure_owned(
    state: &AppState,
    kind: Owned,
    user_id: Uuid,
    ids: &[Uuid],
    field: &'static str,
) -> ApiResult<()> {
    if owns_all(&state.db, kind, user_id, ids).await? {
        Ok(())
    } else {
        let noun = match kind {
            Owned::Application => "Application",
            Owned::Document => "Document",
            Owned::Label => "Label",
        };
        Err(ApiError::field(field, format!("{} does not exist", noun)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Some("  Remote ".to_string())), Some("Remote".to_string()));
        assert_eq!(trimmed(Some("   ".to_string())), None);
        assert_eq!(trimmed(None), None);
    }
}
