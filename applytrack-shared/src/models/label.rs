/// User-defined labels for applications
///
/// Names are unique per user among live labels, case-insensitively
/// (`labels_user_name_live_key`). Colors are `#RRGGBB`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Color used when none is given
pub const DEFAULT_COLOR: &str = "#6B7280";

const COLUMNS: &str = "id, user_id, name, color, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Label {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Label with the number of live applications carrying it
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LabelWithCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub label: Label,
    pub application_count: i64,
}

/// Whether a string is a `#RRGGBB` color
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Label {
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        name: &str,
        color: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO labels (user_id, name, color) VALUES ($1, $2, $3) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Label>(&sql)
            .bind(user_id)
            .bind(name.trim())
            .bind(color.unwrap_or(DEFAULT_COLOR).to_ascii_uppercase())
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM labels WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Label>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// All live labels by name, with usage counts
    pub async fn list(pool: &PgPool, user_id: Uuid) -> Result<Vec<LabelWithCount>, sqlx::Error> {
        sqlx::query_as::<_, LabelWithCount>(
            r#"
            SELECT l.id, l.user_id, l.name, l.color, l.created_at, l.updated_at,
                   COUNT(a.id) AS application_count
            FROM labels l
            LEFT JOIN application_labels al ON al.label_id = l.id
            LEFT JOIN job_applications a ON a.id = al.application_id AND a.deleted_at IS NULL
            WHERE l.user_id = $1 AND l.deleted_at IS NULL
            GROUP BY l.id
            ORDER BY lower(l.name)
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Live labels attached to an application
    pub async fn for_application(pool: &PgPool, application_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Label>(
            r#"
            SELECT l.id, l.user_id, l.name, l.color, l.created_at, l.updated_at
            FROM labels l
            JOIN application_labels al ON al.label_id = l.id
            WHERE al.application_id = $1 AND l.deleted_at IS NULL
            ORDER BY lower(l.name)
            "#,
        )
        .bind(application_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "UPDATE labels SET name = COALESCE($3, name), color = COALESCE($4, color), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Label>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(name.map(str::trim))
            .bind(color.map(str::to_ascii_uppercase))
            .fetch_optional(pool)
            .await
    }

    /// Soft-deletes the label and detaches it from every application
    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE labels SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM application_labels WHERE label_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hex_color() {
        assert!(is_hex_color("#6B7280"));
        assert!(is_hex_color("#abcdef"));
        assert!(!is_hex_color("6B7280"));
        assert!(!is_hex_color("#6B728"));
        assert!(!is_hex_color("#6B72800"));
        assert!(!is_hex_color("#GGGGGG"));
    }

    #[test]
    fn test_default_color_is_valid() {
        assert!(is_hex_color(DEFAULT_COLOR));
    }
}
