/// Document metadata endpoints
///
/// Files are not uploaded here; a document records where the file lives.
///
/// - `GET    /v1/documents?kind`
/// - `POST   /v1/documents` - Counts against the plan quota
/// - `GET    /v1/documents/:id`
/// - `PATCH  /v1/documents/:id`
/// - `DELETE /v1/documents/:id`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, ValidatedJson},
    routes::trimmed,
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    models::{
        document::{CreateDocument, Document, DocumentKind, UpdateDocument},
        nullable, Page, PageParams, Pagination,
    },
    plan::Resource,
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub kind: DocumentKind,

    #[validate(url(message = "Document URL must be a URL"), length(max = 2048))]
    pub url: String,

    #[validate(length(max = 100))]
    pub mime_type: Option<String>,

    #[validate(range(min = 0, message = "Size must not be negative"))]
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDocumentRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    pub kind: Option<DocumentKind>,

    #[validate(url(message = "Document URL must be a URL"), length(max = 2048))]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 100))]
    pub mime_type: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 0, message = "Size must not be negative"))]
    pub size_bytes: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub kind: Option<DocumentKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Document>>> {
    let pagination = Pagination::from(PageParams {
        page: params.page,
        per_page: params.per_page,
    });

    let (documents, total) = Document::list(&state.db, auth.user_id, params.kind, pagination).await?;
    Ok(Json(Page::new(documents, pagination, total)))
}

/// Records a document
///
/// # Errors
///
/// - `403 Forbidden`: Plan document limit reached
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateDocumentRequest>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    state
        .quota
        .enforce(auth.user_id, auth.plan, Resource::Documents, 1)
        .await?;

    let document = Document::create(
        &state.db,
        auth.user_id,
        CreateDocument {
            name: req.name.trim().to_string(),
            kind: req.kind,
            url: req.url,
            mime_type: trimmed(req.mime_type),
            size_bytes: req.size_bytes,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Document>> {
    let document = Document::find(&state.db, auth.user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Document"))?;

    Ok(Json(document))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateDocumentRequest>,
) -> ApiResult<Json<Document>> {
    let document = Document::update(
        &state.db,
        auth.user_id,
        id,
        UpdateDocument {
            name: req.name.map(|n| n.trim().to_string()),
            kind: req.kind,
            url: req.url,
            mime_type: req.mime_type.map(trimmed),
            size_bytes: req.size_bytes,
        },
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Document"))?;

    Ok(Json(document))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Document::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Document"));
    }

    Ok(StatusCode::NO_CONTENT)
}
