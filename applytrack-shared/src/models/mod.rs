/// Database models for ApplyTrack
///
/// Every owned resource is scoped by `user_id` and, where the user can delete
/// it, by `deleted_at IS NULL`. Reads never return soft-deleted rows and a
/// foreign id behaves exactly like a missing one.
///
/// # Models
///
/// - `user`, `oauth_account`: accounts and linked identity providers
/// - `application`, `interview`, `task`, `contact`, `document`, `label`,
///   `attachment`: the tracked pipeline
/// - `session`, `password_reset`: credentials
/// - `email_preferences`, `audit_log`, `webhook_event`: account plumbing
/// - `dashboard`: read-only analytics queries
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::models::user::{User, CreateUser};
/// use applytrack_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     email: "user@example.com".to_string(),
///     password_hash: Some("$argon2id$...".to_string()),
///     name: Some("Jane Doe".to_string()),
///     avatar_url: None,
///     email_verified: false,
/// }).await?;
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub mod application;
pub mod attachment;
pub mod audit_log;
pub mod contact;
pub mod dashboard;
pub mod document;
pub mod email_preferences;
pub mod interview;
pub mod label;
pub mod oauth_account;
pub mod password_reset;
pub mod session;
pub mod task;
pub mod user;
pub mod webhook_event;

/// Default page size for list endpoints
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Largest accepted page size
pub const MAX_PER_PAGE: u32 = 100;

/// Raw pagination query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Normalized pagination: page >= 1, per_page clamped to 1..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

impl From<PageParams> for Pagination {
    fn from(params: PageParams) -> Self {
        Self {
            page: params.page.unwrap_or(1).max(1),
            per_page: params
                .per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
        }
    }
}

/// One page of a list response
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total: i64) -> Self {
        Self {
            data,
            page: pagination.page,
            per_page: pagination.per_page,
            total,
        }
    }

    /// Converts the items while keeping the paging metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Soft-deletable resource that can be referenced by id from another one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owned {
    Application,
    Document,
    Label,
}

impl Owned {
    fn table(&self) -> &'static str {
        match self {
            Owned::Application => "job_applications",
            Owned::Document => "documents",
            Owned::Label => "labels",
        }
    }
}

/// Whether every id names a live row owned by the user
///
/// Used to reject cross-tenant references (application_id, label_id,
/// document_id) before they are written.
pub async fn owns_all(
    pool: &PgPool,
    kind: Owned,
    user_id: Uuid,
    ids: &[Uuid],
) -> Result<bool, sqlx::Error> {
    if ids.is_empty() {
        return Ok(true);
    }

    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE user_id = $1 AND deleted_at IS NULL AND id = ANY($2)",
        kind.table()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(&unique)
        .fetch_one(pool)
        .await?;

    Ok(count as usize == unique.len())
}

/// Single-id form of [`owns_all`]
pub async fn owns(pool: &PgPool, kind: Owned, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
    owns_all(pool, kind, user_id, &[id]).await
}

/// Deserializes a present field into `Some`, keeping `null` as `Some(None)`
///
/// Combined with `#[serde(default)]` this distinguishes an absent field
/// (`None`, leave untouched) from an explicit `null` (`Some(None)`, clear).
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let p = Pagination::from(PageParams::default());
        assert_eq!(p, Pagination { page: 1, per_page: 20 });
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn test_pagination_clamps() {
        let p = Pagination::from(PageParams {
            page: Some(0),
            per_page: Some(500),
        });
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, 100);

        let p = Pagination::from(PageParams {
            page: Some(3),
            per_page: Some(0),
        });
        assert_eq!(p.per_page, 1);
        assert_eq!(p.offset(), 2);
    }

    #[test]
    fn test_offset() {
        let p = Pagination { page: 4, per_page: 25 };
        assert_eq!(p.offset(), 75);
        assert_eq!(p.limit(), 25);
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        notes: Option<Option<String>>,
    }

    #[test]
    fn test_nullable_distinguishes_absent_and_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.notes, None);

        let null: Patch = serde_json::from_str(r#"{"notes": null}"#).unwrap();
        assert_eq!(null.notes, Some(None));

        let set: Patch = serde_json::from_str(r#"{"notes": "hi"}"#).unwrap();
        assert_eq!(set.notes, Some(Some("hi".to_string())));
    }

    #[test]
    fn test_page_map() {
        let page = Page::new(vec![1, 2], Pagination { page: 1, per_page: 20 }, 2);
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.data, vec![10, 20]);
        assert_eq!(mapped.total, 2);
    }
}
