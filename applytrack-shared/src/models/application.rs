/// Job applications
///
/// The central resource: one row per position the user is pursuing, moving
/// through the pipeline stages below.
///
/// # Pipeline
///
/// ```text
/// SAVED → APPLIED → SCREENING → INTERVIEW → OFFER → ACCEPTED
///                                                 → REJECTED
///                 (any stage)                     → WITHDRAWN
/// ```
///
/// Stages are not a strict state machine; users move cards freely.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE job_applications (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     company VARCHAR(255) NOT NULL,
///     position VARCHAR(255) NOT NULL,
///     location VARCHAR(255),
///     job_url VARCHAR(2048),
///     salary_min BIGINT,
///     salary_max BIGINT,
///     salary_currency VARCHAR(3),
///     stage TEXT NOT NULL DEFAULT 'APPLIED',
///     priority TEXT NOT NULL DEFAULT 'MEDIUM',
///     source VARCHAR(255),
///     applied_at TIMESTAMPTZ,
///     notes TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Pagination;

const COLUMNS: &str = "id, user_id, company, position, location, job_url, salary_min, salary_max, \
     salary_currency, stage, priority, source, applied_at, notes, created_at, updated_at";

/// Field limits in characters, shared by request validation and CSV import
pub const MAX_COMPANY_LEN: usize = 200;
pub const MAX_POSITION_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_JOB_URL_LEN: usize = 2048;
pub const MAX_SOURCE_LEN: usize = 100;
pub const MAX_NOTES_LEN: usize = 10_000;

/// Pipeline stage of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Saved,
    Applied,
    Screening,
    Interview,
    Offer,
    Accepted,
    Rejected,
    Withdrawn,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Saved,
        Stage::Applied,
        Stage::Screening,
        Stage::Interview,
        Stage::Offer,
        Stage::Accepted,
        Stage::Rejected,
        Stage::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Saved => "SAVED",
            Stage::Applied => "APPLIED",
            Stage::Screening => "SCREENING",
            Stage::Interview => "INTERVIEW",
            Stage::Offer => "OFFER",
            Stage::Accepted => "ACCEPTED",
            Stage::Rejected => "REJECTED",
            Stage::Withdrawn => "WITHDRAWN",
        }
    }

    /// Whether the application has been sent
    pub fn is_submitted(&self) -> bool {
        !matches!(self, Stage::Saved)
    }

    /// Whether the employer has responded (moved past APPLIED)
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            Stage::Screening | Stage::Interview | Stage::Offer | Stage::Accepted | Stage::Rejected
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized enum value in user input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Stage {
    type Err = ParseEnumError;

    /// Case-insensitive; spaces and dashes are accepted as underscores
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                kind: "stage",
                value: s.to_string(),
            })
    }
}

/// Priority of an application or task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            _ => Err(ParseEnumError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Job application row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Application {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub job_url: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub stage: Stage,
    pub priority: Priority,
    pub source: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an application
#[derive(Debug, Clone, PartialEq)]
pub struct CreateApplication {
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub job_url: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub stage: Stage,
    pub priority: Priority,
    pub source: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl CreateApplication {
    /// Minimal application in the default stage and priority
    pub fn new(company: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            position: position.into(),
            location: None,
            job_url: None,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            stage: Stage::Applied,
            priority: Priority::Medium,
            source: None,
            applied_at: None,
            notes: None,
        }
    }
}

/// Partial update; `Some(None)` clears a nullable field
#[derive(Debug, Clone, Default)]
pub struct UpdateApplication {
    pub company: Option<String>,
    pub position: Option<String>,
    pub location: Option<Option<String>>,
    pub job_url: Option<Option<String>>,
    pub salary_min: Option<Option<i64>>,
    pub salary_max: Option<Option<i64>>,
    pub salary_currency: Option<Option<String>>,
    pub stage: Option<Stage>,
    pub priority: Option<Priority>,
    pub source: Option<Option<String>>,
    pub applied_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<Option<String>>,
}

/// Sortable columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    AppliedAt,
    Company,
    Stage,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "a.created_at",
            SortField::UpdatedAt => "a.updated_at",
            SortField::AppliedAt => "a.applied_at",
            SortField::Company => "lower(a.company)",
            SortField::Stage => "a.stage",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// List filters
#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub stage: Option<Stage>,
    pub label_id: Option<Uuid>,
    /// Case-insensitive substring over company, position and notes
    pub q: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
}

/// Escapes LIKE wildcards in user input
fn like_pattern(q: &str) -> String {
    let escaped = q
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_filters<'a>(query: &mut QueryBuilder<'a, Postgres>, user_id: Uuid, filter: &'a ApplicationFilter) {
    query
        .push(" WHERE a.user_id = ")
        .push_bind(user_id)
        .push(" AND a.deleted_at IS NULL");

    if let Some(stage) = filter.stage {
        query.push(" AND a.stage = ").push_bind(stage);
    }

    if let Some(label_id) = filter.label_id {
        query
            .push(
                " AND EXISTS (SELECT 1 FROM application_labels al \
                 JOIN labels l ON l.id = al.label_id AND l.deleted_at IS NULL \
                 WHERE al.application_id = a.id AND al.label_id = ",
            )
            .push_bind(label_id)
            .push(")");
    }

    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = like_pattern(q);
        query
            .push(" AND (a.company ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.position ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.notes ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl Application {
    /// Inserts an application
    ///
    /// A submitted stage without `applied_at` is stamped with the current
    /// time.
    pub async fn create(
        conn: &mut PgConnection,
        user_id: Uuid,
        data: CreateApplication,
    ) -> Result<Self, sqlx::Error> {
        let applied_at = match data.applied_at {
            Some(at) => Some(at),
            None if data.stage.is_submitted() => Some(Utc::now()),
            None => None,
        };

        let sql = format!(
            "INSERT INTO job_applications \
             (user_id, company, position, location, job_url, salary_min, salary_max, salary_currency, \
              stage, priority, source, applied_at, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Application>(&sql)
            .bind(user_id)
            .bind(data.company)
            .bind(data.position)
            .bind(data.location)
            .bind(data.job_url)
            .bind(data.salary_min)
            .bind(data.salary_max)
            .bind(data.salary_currency)
            .bind(data.stage)
            .bind(data.priority)
            .bind(data.source)
            .bind(applied_at)
            .bind(data.notes)
            .fetch_one(conn)
            .await
    }

    /// Inserts a batch in one transaction
    pub async fn create_many(
        pool: &PgPool,
        user_id: Uuid,
        rows: Vec<CreateApplication>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(rows.len());

        for row in rows {
            created.push(Self::create(&mut tx, user_id, row).await?);
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Finds a live application owned by the user
    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM job_applications WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Application>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists one page of the user's applications
    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        filter: &ApplicationFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut query = QueryBuilder::new("SELECT ");
        for (i, column) in COLUMNS.split(", ").enumerate() {
            if i > 0 {
                query.push(", ");
            }
            query.push("a.").push(column);
        }
        query.push(" FROM job_applications a");
        push_filters(&mut query, user_id, filter);
        query
            .push(" ORDER BY ")
            .push(filter.sort.column())
            .push(" ")
            .push(filter.order.keyword())
            .push(" NULLS LAST, a.id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let items = query.build_query_as::<Application>().fetch_all(pool).await?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM job_applications a");
        push_filters(&mut count, user_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        Ok((items, total))
    }

    /// All live applications, oldest first (CSV export)
    pub async fn list_all(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM job_applications WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at, id",
            COLUMNS
        );

        sqlx::query_as::<_, Application>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Applies a partial update
    ///
    /// Returns `None` when the application is missing, deleted or foreign.
    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        data: UpdateApplication,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE job_applications SET updated_at = NOW()");

        if let Some(company) = data.company {
            query.push(", company = ").push_bind(company);
        }
        if let Some(position) = data.position {
            query.push(", position = ").push_bind(position);
        }
        if let Some(location) = data.location {
            query.push(", location = ").push_bind(location);
        }
        if let Some(job_url) = data.job_url {
            query.push(", job_url = ").push_bind(job_url);
        }
        if let Some(salary_min) = data.salary_min {
            query.push(", salary_min = ").push_bind(salary_min);
        }
        if let Some(salary_max) = data.salary_max {
            query.push(", salary_max = ").push_bind(salary_max);
        }
        if let Some(salary_currency) = data.salary_currency {
            query.push(", salary_currency = ").push_bind(salary_currency);
        }
        if let Some(stage) = data.stage {
            query.push(", stage = ").push_bind(stage);
            if stage.is_submitted() && data.applied_at.is_none() {
                query.push(", applied_at = COALESCE(applied_at, NOW())");
            }
        }
        if let Some(priority) = data.priority {
            query.push(", priority = ").push_bind(priority);
        }
        if let Some(source) = data.source {
            query.push(", source = ").push_bind(source);
        }
        if let Some(applied_at) = data.applied_at {
            query.push(", applied_at = ").push_bind(applied_at);
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

        query.build_query_as::<Application>().fetch_optional(pool).await
    }

    /// Soft-deletes the application and its interviews
    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE job_applications SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        // interviews can't outlive their application
        sqlx::query(
            "UPDATE interviews SET deleted_at = NOW(), updated_at = NOW() \
             WHERE application_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Replaces the application's label set
    ///
    /// Runs on the caller's connection so it can share a transaction with
    /// the insert. Callers verify beforehand that every label is owned and
    /// live.
    pub async fn set_labels(conn: &mut PgConnection, id: Uuid, label_ids: &[Uuid]) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM application_labels WHERE application_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if !label_ids.is_empty() {
            sqlx::query(
                "INSERT INTO application_labels (application_id, label_id) \
                 SELECT $1, unnest($2::uuid[]) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(label_ids)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse() {
        assert_eq!("applied".parse::<Stage>().unwrap(), Stage::Applied);
        assert_eq!(" Offer ".parse::<Stage>().unwrap(), Stage::Offer);
        assert_eq!("WITHDRAWN".parse::<Stage>().unwrap(), Stage::Withdrawn);
        assert!("ghosted".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_matches_db_names() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
    }

    #[test]
    fn test_stage_response() {
        assert!(!Stage::Saved.is_submitted());
        assert!(Stage::Applied.is_submitted());
        assert!(!Stage::Applied.has_response());
        assert!(Stage::Rejected.has_response());
        assert!(!Stage::Withdrawn.has_response());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("Low".parse::<Priority>().unwrap(), Priority::Low);
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert_eq!(err.to_string(), "invalid priority 'urgent'");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
    }

    #[test]
    fn test_sort_defaults() {
        let filter = ApplicationFilter::default();
        assert_eq!(filter.sort, SortField::CreatedAt);
        assert_eq!(filter.order, SortOrder::Desc);
        assert_eq!(SortField::Company.column(), "lower(a.company)");
    }

    #[test]
    fn test_list_query_shape() {
        let filter = ApplicationFilter {
            stage: Some(Stage::Interview),
            label_id: Some(Uuid::new_v4()),
            q: Some("rust".to_string()),
            ..Default::default()
        };
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM job_applications a");
        push_filters(&mut query, Uuid::new_v4(), &filter);
        let sql = query.sql();

        assert!(sql.contains("a.user_id = $1"));
        assert!(sql.contains("a.deleted_at IS NULL"));
        assert!(sql.contains("a.stage = $2"));
        assert!(sql.contains("al.label_id = $3"));
        assert!(sql.contains("a.company ILIKE $4"));
    }

    #[test]
    fn test_create_application_defaults() {
        let data = CreateApplication::new("Acme", "Engineer");
        assert_eq!(data.stage, Stage::Applied);
        assert_eq!(data.priority, Priority::Medium);
    }
}
