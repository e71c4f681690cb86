/// Recruiters, hiring managers and referrals

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::Pagination;

const COLUMNS: &str = "id, user_id, application_id, name, email, phone, company, role, linkedin_url, \
     notes, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Contact {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub application_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub linkedin_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateContact {
    pub application_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub linkedin_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateContact {
    pub application_id: Option<Option<Uuid>>,
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub company: Option<Option<String>>,
    pub role: Option<Option<String>>,
    pub linkedin_url: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    pub application_id: Option<Uuid>,
    /// Case-insensitive substring over name, company and email
    pub q: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, filter: &ContactFilter) {
    query
        .push(" WHERE user_id = ")
        .push_bind(user_id)
        .push(" AND deleted_at IS NULL");

    if let Some(application_id) = filter.application_id {
        query.push(" AND application_id = ").push_bind(application_id);
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        query
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR company ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl Contact {
    pub async fn create(pool: &PgPool, user_id: Uuid, data: CreateContact) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO contacts \
             (user_id, application_id, name, email, phone, company, role, linkedin_url, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Contact>(&sql)
            .bind(user_id)
            .bind(data.application_id)
            .bind(data.name)
            .bind(data.email)
            .bind(data.phone)
            .bind(data.company)
            .bind(data.role)
            .bind(data.linkedin_url)
            .bind(data.notes)
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM contacts WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Contact>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        filter: &ContactFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut query = QueryBuilder::new(format!("SELECT {} FROM contacts", COLUMNS));
        push_filters(&mut query, user_id, filter);
        query
            .push(" ORDER BY lower(name), id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let items = query.build_query_as::<Contact>().fetch_all(pool).await?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM contacts");
        push_filters(&mut count, user_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        Ok((items, total))
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        data: UpdateContact,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE contacts SET updated_at = NOW()");

        if let Some(application_id) = data.application_id {
            query.push(", application_id = ").push_bind(application_id);
        }
        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(email) = data.email {
            query.push(", email = ").push_bind(email);
        }
        if let Some(phone) = data.phone {
            query.push(", phone = ").push_bind(phone);
        }
        if let Some(company) = data.company {
            query.push(", company = ").push_bind(company);
        }
        if let Some(role) = data.role {
            query.push(", role = ").push_bind(role);
        }
        if let Some(linkedin_url) = data.linkedin_url {
            query.push(", linkedin_url = ").push_bind(linkedin_url);
        }
        if let Some(notes) = data.notes {
            query.push(", notes = ").push_bind(notes);
        }

        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" AND deleted_at IS NULL RETURNING ")
            .push(COLUMNS);

        query.build_query_as::<Contact>().fetch_optional(pool).await
    }

    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE contacts SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
