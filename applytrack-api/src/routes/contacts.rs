/// Contact endpoints (recruiters, hiring managers, referrals)
///
/// - `GET    /v1/contacts?application_id&q`
/// - `POST   /v1/contacts`
/// - `GET    /v1/contacts/:id`
/// - `PATCH  /v1/contacts/:id`
/// - `DELETE /v1/contacts/:id`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, ValidatedJson},
    routes::{ensure_owned, trimmed},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        contact::{Contact, ContactFilter, CreateContact, UpdateContact},
        nullable, Owned, Page, PageParams, Pagination,
    },
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateContactRequest {
    pub application_id: Option<Uuid>,

    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,

    #[validate(length(max = 50))]
    pub phone: Option<String>,

    #[validate(length(max = 200))]
    pub company: Option<String>,

    #[validate(length(max = 200))]
    pub role: Option<String>,

    #[validate(url(message = "LinkedIn URL must be a URL"), length(max = 2048))]
    pub linkedin_url: Option<String>,

    #[validate(length(max = 10000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateContactRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub application_id: Option<Option<Uuid>>,

    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 50))]
    pub phone: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200))]
    pub company: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200))]
    pub role: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(url(message = "LinkedIn URL must be a URL"), length(max = 2048))]
    pub linkedin_url: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10000))]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub application_id: Option<Uuid>,
    pub q: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Contact>>> {
    let pagination = Pagination::from(PageParams {
        page: params.page,
        per_page: params.per_page,
    });
    let filter = ContactFilter {
        application_id: params.application_id,
        q: params.q,
    };

    let (contacts, total) = Contact::list(&state.db, auth.user_id, &filter, pagination).await?;
    Ok(Json(Page::new(contacts, pagination, total)))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateContactRequest>,
) -> ApiResult<(StatusCode, Json<Contact>)> {
    if let Some(application_id) = req.application_id {
        ensure_owned(&state, Owned::Application, auth.user_id, &[application_id], "application_id").await?;
    }

    let contact = Contact::create(
        &state.db,
        auth.user_id,
        CreateContact {
            application_id: req.application_id,
            name: req.name.trim().to_string(),
            email: trimmed(req.email).map(|e| e.to_lowercase()),
            phone: trimmed(req.phone),
            company: trimmed(req.company),
            role: trimmed(req.role),
            linkedin_url: req.linkedin_url,
            notes: req.notes,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(contact)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Contact>> {
    let contact = Contact::find(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact"))?;

    Ok(Json(contact))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateContactRequest>,
) -> ApiResult<Json<Contact>> {
    if let Some(Some(application_id)) = req.application_id {
        ensure_owned(&state, Owned::Application, auth.user_id, &[application_id], "application_id").await?;
    }

    let contact = Contact::update(
        &state.db,
        auth.user_id,
        id,
        UpdateContact {
            application_id: req.application_id,
            name: req.name.map(|n| n.trim().to_string()),
            email: req.email.map(|e| trimmed(e).map(|e| e.to_lowercase())),
            phone: req.phone.map(trimmed),
            company: req.company.map(trimmed),
            role: req.role.map(trimmed),
            linkedin_url: req.linkedin_url,
            notes: req.notes,
        },
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Contact"))?;

    Ok(Json(contact))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Contact::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Contact"));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let req: CreateContactRequest = serde_json::from_str(
            r#"{"name": "Dana Recruiter", "email": "not-an-email", "linkedin_url": "linkedin"}"#,
        )
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("linkedin_url"));
        assert!(!fields.contains_key("name"));
    }

    #[test]
    fn test_update_request_clears_email() {
        let req: UpdateContactRequest = serde_json::from_str(r#"{"email": null}"#).unwrap();
        assert_eq!(req.email, Some(None));
        assert!(req.validate().is_ok());
    }
}
