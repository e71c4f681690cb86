/// Interview endpoints
///
/// - `GET    /v1/interviews?application_id&from&to&outcome` - By scheduled time
/// - `POST   /v1/interviews`
/// - `GET    /v1/interviews/:id`
/// - `PATCH  /v1/interviews/:id` - Rescheduling re-arms the reminder
/// - `DELETE /v1/interviews/:id`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, ValidatedJson},
    routes::{ensure_owned, trimmed},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        interview::{CreateInterview, Interview, InterviewFilter, InterviewKind, Outcome, UpdateInterview},
        nullable, Owned, Page, PageParams, Pagination,
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInterviewRequest {
    pub application_id: Uuid,

    pub kind: InterviewKind,

    pub scheduled_at: DateTime<Utc>,

    #[validate(range(min = 1, max = 1440, message = "Duration must be 1-1440 minutes"))]
    pub duration_minutes: Option<i32>,

    #[validate(length(max = 500))]
    pub location: Option<String>,

    #[validate(length(max = 200))]
    pub interviewer: Option<String>,

    #[validate(length(max = 10000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInterviewRequest {
    pub application_id: Option<Uuid>,

    pub kind: Option<InterviewKind>,

    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 1, max = 1440, message = "Duration must be 1-1440 minutes"))]
    pub duration_minutes: Option<Option<i32>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 500))]
    pub location: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200))]
    pub interviewer: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10000))]
    pub notes: Option<Option<String>>,

    pub outcome: Option<Outcome>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub application_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    fn into_filter(self) -> ApiResult<(InterviewFilter, Pagination)> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from >= to {
                return Err(ApiError::field("to", "to must be after from"));
            }
        }

        let filter = InterviewFilter {
            application_id: self.application_id,
            from: self.from,
            to: self.to,
            outcome: self.outcome,
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
) -> ApiResult<Json<Page<Interview>>> {
    let (filter, pagination) = params.into_filter()?;
    let (interviews, total) = Interview::list(&state.db, auth.user_id, &filter, pagination).await?;

    Ok(Json(Page::new(interviews, pagination, total)))
}

/// Schedules an interview for one of the caller's applications
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Invalid fields or unknown application
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateInterviewRequest>,
) -> ApiResult<(StatusCode, Json<Interview>)> {
    ensure_owned(&state, Owned::Application, auth.user_id, &[req.application_id], "application_id").await?;

    let interview = Interview::create(
        &state.db,
        auth.user_id,
        CreateInterview {
            application_id: req.application_id,
            kind: req.kind,
            scheduled_at: req.scheduled_at,
            duration_minutes: req.duration_minutes,
            location: trimmed(req.location),
            interviewer: trimmed(req.interviewer),
            notes: req.notes,
        },
    )
    .await?;

    tracing::info!(
        user_id = %auth.user_id,
        interview_id = %interview.id,
        scheduled_at = %interview.scheduled_at,
        "Interview scheduled"
    );

    Ok((StatusCode::CREATED, Json(interview)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Interview>> {
    let interview = Interview::find(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Interview"))?;

    Ok(Json(interview))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateInterviewRequest>,
) -> ApiResult<Json<Interview>> {
    if let Some(application_id) = req.application_id {
        ensure_owned(&state, Owned::Application, auth.user_id, &[application_id], "application_id").await?;
    }

    let interview = Interview::update(
        &state.db,
        auth.user_id,
        id,
        UpdateInterview {
            application_id: req.application_id,
            kind: req.kind,
            scheduled_at: req.scheduled_at,
            duration_minutes: req.duration_minutes,
            location: req.location.map(trimmed),
            interviewer: req.interviewer.map(trimmed),
            notes: req.notes,
            outcome: req.outcome,
        },
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Interview"))?;

    Ok(Json(interview))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Interview::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Interview"));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request() {
        let req: CreateInterviewRequest = serde_json::from_str(
            r#"{
                "application_id": "7d4a6c1e-3a43-4a8e-9a43-3f5b1c2d9e10",
                "kind": "TECHNICAL",
                "scheduled_at": "2026-03-02T15:00:00Z",
                "duration_minutes": 0
            }"#,
        )
        .unwrap();

        assert_eq!(req.kind, InterviewKind::Technical);
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("duration_minutes"));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_str::<CreateInterviewRequest>(
            r#"{
                "application_id": "7d4a6c1e-3a43-4a8e-9a43-3f5b1c2d9e10",
                "kind": "LUNCH",
                "scheduled_at": "2026-03-02T15:00:00Z"
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_update_request_outcome_and_clear() {
        let req: UpdateInterviewRequest =
            serde_json::from_str(r#"{"outcome": "PASSED", "location": null}"#).unwrap();

        assert_eq!(req.outcome, Some(Outcome::Passed));
        assert_eq!(req.location, Some(None));
        assert!(req.scheduled_at.is_none());
    }

    #[test]
    fn test_list_range_must_be_ordered() {
        let at = |s: &str| Some(s.parse::<DateTime<Utc>>().unwrap());

        let params = ListParams {
            from: at("2026-03-10T00:00:00Z"),
            to: at("2026-03-01T00:00:00Z"),
            ..Default::default()
        };
        assert!(matches!(params.into_filter(), Err(ApiError::ValidationError(_))));

        let params = ListParams {
            from: at("2026-03-01T00:00:00Z"),
            to: at("2026-03-10T00:00:00Z"),
            ..Default::default()
        };
        assert!(params.into_filter().is_ok());
    }
}
