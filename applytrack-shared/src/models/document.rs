/// Document metadata (resumes, cover letters, ...)
///
/// Only metadata is stored; the file itself lives at `url`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::Pagination;

const COLUMNS: &str = "id, user_id, name, kind, url, mime_type, size_bytes, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Resume,
    CoverLetter,
    Portfolio,
    Transcript,
    Other,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub name: String,
    pub kind: DocumentKind,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub name: String,
    pub kind: DocumentKind,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDocument {
    pub name: Option<String>,
    pub kind: Option<DocumentKind>,
    pub url: Option<String>,
    pub mime_type: Option<Option<String>>,
    pub size_bytes: Option<Option<i64>>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, kind: Option<DocumentKind>) {
    query
        .push(" WHERE user_id = ")
        .push_bind(user_id)
        .push(" AND deleted_at IS NULL");

    if let Some(kind) = kind {
        query.push(" AND kind = ").push_bind(kind);
    }
}

impl Document {
    pub async fn create(pool: &PgPool, user_id: Uuid, data: CreateDocument) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO documents (user_id, name, kind, url, mime_type, size_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Document>(&sql)
            .bind(user_id)
            .bind(data.name)
            .bind(data.kind)
            .bind(data.url)
            .bind(data.mime_type)
            .bind(data.size_bytes)
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM documents WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        kind: Option<DocumentKind>,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut query = QueryBuilder::new(format!("SELECT {} FROM documents", COLUMNS));
        push_filters(&mut query, user_id, kind);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let items = query.build_query_as::<Document>().fetch_all(pool).await?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM documents");
        push_filters(&mut count, user_id, kind);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        Ok((items, total))
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        data: UpdateDocument,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE documents SET updated_at = NOW()");

        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(kind) = data.kind {
            query.push(", kind = ").push_bind(kind);
        }
        if let Some(url) = data.url {
            query.push(", url = ").push_bind(url);
        }
        if let Some(mime_type) = data.mime_type {
            query.push(", mime_type = ").push_bind(mime_type);
        }
        if let Some(size_bytes) = data.size_bytes {
            query.push(", size_bytes = ").push_bind(size_bytes);
        }

        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" AND deleted_at IS NULL RETURNING ")
            .push(COLUMNS);

        query.build_query_as::<Document>().fetch_optional(pool).await
    }

    /// Soft-deletes the document and drops its attachment links
    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE documents SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM attachment_links WHERE document_id = $1")
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
    fn test_kind_serde() {
        assert_eq!(
            serde_json::to_string(&DocumentKind::CoverLetter).unwrap(),
            "\"COVER_LETTER\""
        );
        let kind: DocumentKind = serde_json::from_str("\"RESUME\"").unwrap();
        assert_eq!(kind, DocumentKind::Resume);
    }
}
