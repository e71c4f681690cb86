/// Purges rows that no longer serve any request
///
/// - sessions that expired or were revoked longer than the retention ago
/// - password reset tokens that were used or have expired

use applytrack_shared::models::{password_reset::PasswordResetToken, session::Session};
use chrono::Duration;
use sqlx::PgPool;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub reset_tokens: u64,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.reset_tokens == 0
    }
}

pub async fn purge_stale(db: &PgPool, session_retention: Duration) -> Result<CleanupReport, sqlx::Error> {
    let sessions = Session::purge_stale(db, session_retention).await?;
    let reset_tokens = PasswordResetToken::purge_stale(db).await?;

    Ok(CleanupReport { sessions, reset_tokens })
}
