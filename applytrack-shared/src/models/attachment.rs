/// Links between applications and documents
///
/// A document can be attached to many applications and vice versa; each
/// pair at most once (`attachment_links_pair_key`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::document::DocumentKind;

/// Document as seen through an attachment
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttachedDocument {
    pub link_id: Uuid,
    pub document_id: Uuid,
    pub name: String,
    pub kind: DocumentKind,
    pub url: String,
    pub mime_type: Option<String>,
    pub attached_at: DateTime<Utc>,
}

pub struct AttachmentLink;

impl AttachmentLink {
    /// Attaches a document; false when the pair already exists
    pub async fn attach(
        pool: &PgPool,
        user_id: Uuid,
        application_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO attachment_links (user_id, application_id, document_id) VALUES ($1, $2, $3) \
             ON CONFLICT (application_id, document_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(application_id)
        .bind(document_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn detach(
        pool: &PgPool,
        user_id: Uuid,
        application_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM attachment_links WHERE user_id = $1 AND application_id = $2 AND document_id = $3",
        )
        .bind(user_id)
        .bind(application_id)
        .bind(document_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Live documents attached to an application
    pub async fn list_for_application(
        pool: &PgPool,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<Vec<AttachedDocument>, sqlx::Error> {
        sqlx::query_as::<_, AttachedDocument>(
            r#"
            SELECT l.id AS link_id, d.id AS document_id, d.name, d.kind, d.url, d.mime_type,
                   l.created_at AS attached_at
            FROM attachment_links l
            JOIN documents d ON d.id = l.document_id AND d.deleted_at IS NULL
            WHERE l.user_id = $1 AND l.application_id = $2
            ORDER BY l.created_at
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .fetch_all(pool)
        .await
    }
}
