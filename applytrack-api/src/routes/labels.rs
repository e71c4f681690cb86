/// Label endpoints
///
/// Names are unique per user (case-insensitive); colors are `#RRGGBB`.
///
/// - `GET    /v1/labels` - All labels with live application counts
/// - `POST   /v1/labels` - Counts against the plan quota
/// - `GET    /v1/labels/:id`
/// - `PATCH  /v1/labels/:id`
/// - `DELETE /v1/labels/:id` - Also detaches it from applications

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ValidatedJson},
    routes::DataResponse,
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::label::{is_hex_color, Label, LabelWithCount},
    plan::Resource,
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn hex_color(value: &str) -> Result<(), ValidationError> {
    if is_hex_color(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("color");
        err.message = Some("Color must look like #RRGGBB".into());
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLabelRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: String,

    #[validate(custom(function = "hex_color"))]
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLabelRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: Option<String>,

    #[validate(custom(function = "hex_color"))]
    pub color: Option<String>,
}

fn blank_name() -> ApiError {
    ApiError::field("name", "Name must not be blank")
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<DataResponse<LabelWithCount>>> {
    Ok(Json(DataResponse {
        data: Label::list(&state.db, auth.user_id).await?,
    }))
}

/// Creates a label
///
/// # Errors
///
/// - `403 Forbidden`: Plan label limit reached
/// - `409 Conflict`: A label with this name exists
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateLabelRequest>,
) -> ApiResult<(StatusCode, Json<Label>)> {
    if req.name.trim().is_empty() {
        return Err(blank_name());
    }

    state
        .quota
        .enforce(auth.user_id, auth.plan, Resource::Labels, 1)
        .await?;

    let label = Label::create(&state.db, auth.user_id, &req.name, req.color.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(label)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Label>> {
    let label = Label::find(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Label"))?;

    Ok(Json(label))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateLabelRequest>,
) -> ApiResult<Json<Label>> {
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(blank_name());
    }

    let label = Label::update(&state.db, auth.user_id, id, req.name.as_deref(), req.color.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Label"))?;

    Ok(Json(label))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Label::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Label"));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_validation() {
        let req = CreateLabelRequest {
            name: "Remote".to_string(),
            color: Some("#1a2B3c".to_string()),
        };
        assert!(req.validate().is_ok());

        let req = CreateLabelRequest {
            name: "Remote".to_string(),
            color: Some("blue".to_string()),
        };
        assert!(req.validate().unwrap_err().field_errors().contains_key("color"));
    }

    #[test]
    fn test_color_is_optional() {
        let req: CreateLabelRequest = serde_json::from_str(r#"{"name": "Dream job"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert!(req.color.is_none());
    }

    #[test]
    fn test_name_length() {
        let req = UpdateLabelRequest {
            name: Some("x".repeat(51)),
            color: None,
        };
        assert!(req.validate().is_err());
    }
}
