/// Task endpoints
///
/// - `GET    /v1/tasks?application_id&status&priority` - `status` is
///   `open`, `completed` or `overdue`
/// - `POST   /v1/tasks`
/// - `GET    /v1/tasks/:id`
/// - `PATCH  /v1/tasks/:id`
/// - `DELETE /v1/tasks/:id`
/// - `POST   /v1/tasks/:id/complete`
/// - `POST   /v1/tasks/:id/reopen`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, ValidatedJson},
    routes::{ensure_owned, trimmed},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        application::Priority,
        nullable,
        task::{CreateTask, Task, TaskFilter, TaskStatus, UpdateTask},
        Owned, Page, PageParams, Pagination,
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    pub application_id: Option<Uuid>,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    pub due_at: Option<DateTime<Utc>>,

    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub application_id: Option<Option<Uuid>>,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 5000))]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub due_at: Option<Option<DateTime<Utc>>>,

    pub priority: Option<Priority>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub application_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    fn into_filter(self) -> ApiResult<(TaskFilter, Pagination)> {
        let priority = self
            .priority
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(str::parse::<Priority>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let filter = TaskFilter {
            application_id: self.application_id,
            status: self.status,
            priority,
        };
        let pagination = Pagination::from(PageParams {
            page: self.page,
            per_page: self.per_page,
        });

        Ok((filter, pagination))
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Task>>> {
    let (filter, pagination) = params.into_filter()?;
    let (tasks, total) = Task::list(&state.db, auth.user_id, &filter, pagination).await?;

    Ok(Json(Page::new(tasks, pagination, total)))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    if let Some(application_id) = req.application_id {
        ensure_owned(&state, Owned::Application, auth.user_id, &[application_id], "application_id").await?;
    }

    let task = Task::create(
        &state.db,
        auth.user_id,
        CreateTask {
            application_id: req.application_id,
            title: req.title.trim().to_string(),
            description: trimmed(req.description),
            due_at: req.due_at,
            priority: req.priority.unwrap_or(Priority::Medium),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = Task::find(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    Ok(Json(task))
}

/// Partial update; moving `due_at` re-arms the reminder
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    if let Some(Some(application_id)) = req.application_id {
        ensure_owned(&state, Owned::Application, auth.user_id, &[application_id], "application_id").await?;
    }

    let task = Task::update(
        &state.db,
        auth.user_id,
        id,
        UpdateTask {
            application_id: req.application_id,
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description.map(trimmed),
            due_at: req.due_at,
            priority: req.priority,
        },
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Task"))?;

    Ok(Json(task))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Task::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Task"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Marks the task done; completing twice keeps the first timestamp
pub async fn complete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = Task::complete(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    tracing::debug!(task_id = %id, "Task completed");
    Ok(Json(task))
}

pub async fn reopen(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = Task::reopen(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    Ok(Json(task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let req: CreateTaskRequest = serde_json::from_str(r#"{"title": ""}"#).unwrap();
        assert!(req.validate().unwrap_err().field_errors().contains_key("title"));

        let req: CreateTaskRequest =
            serde_json::from_str(r#"{"title": "Send thank-you note", "priority": "HIGH"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.priority, Some(Priority::High));
    }

    #[test]
    fn test_update_can_unlink_application() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"application_id": null}"#).unwrap();
        assert_eq!(req.application_id, Some(None));
        assert_eq!(req.due_at, None);
    }

    #[test]
    fn test_list_params() {
        let params = ListParams {
            status: Some(TaskStatus::Overdue),
            priority: Some("high".to_string()),
            ..Default::default()
        };
        let (filter, pagination) = params.into_filter().unwrap();
        assert_eq!(filter.status, Some(TaskStatus::Overdue));
        assert_eq!(filter.priority, Some(Priority::High));
        assert_eq!(pagination.page, 1);

        let params = ListParams {
            priority: Some("urgent".to_string()),
            ..Default::default()
        };
        assert!(matches!(params.into_filter(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_status_query_values() {
        let status: TaskStatus = serde_json::from_str(r#""completed""#).unwrap();
        assert_eq!(status, TaskStatus::Completed);
    }
}
