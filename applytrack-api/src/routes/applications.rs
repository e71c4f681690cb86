/// Job application endpoints
///
/// - `GET    /v1/applications` - Filtered, sorted, paginated list
/// - `POST   /v1/applications` - Create (counts against the plan quota)
/// - `GET    /v1/applications/:id` - Detail with labels and attached documents
/// - `PATCH  /v1/applications/:id` - Partial update, `null` clears a field
/// - `DELETE /v1/applications/:id` - Soft delete
/// - `PUT    /v1/applications/:id/labels` - Replace the label set
/// - `GET    /v1/applications/:id/documents`
/// - `POST   /v1/applications/:id/documents` - Attach a document
/// - `DELETE /v1/applications/:id/documents/:document_id` - Detach
/// - `GET    /v1/applications/export` - CSV download
/// - `POST   /v1/applications/import` - CSV upload (PRO)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, Client, ValidatedJson},
    routes::{ensure_owned, trimmed, DataResponse},
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    csv_io::{self, RowError},
    models::{
        application::{
            Application, ApplicationFilter, CreateApplication, Priority, SortField, SortOrder, Stage,
            UpdateApplication,
        },
        attachment::{AttachedDocument, AttachmentLink},
        audit_log::{AuditAction, AuditEntry, AuditLog},
        label::Label,
        nullable, Owned, Page, PageParams, Pagination,
    },
    plan::{QuotaEnforcer, Resource},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn currency_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApplicationRequest {
    #[validate(length(min = 1, max = 200, message = "Company must be 1-200 characters"))]
    pub company: String,

    #[validate(length(min = 1, max = 200, message = "Position must be 1-200 characters"))]
    pub position: String,

    #[validate(length(max = 200))]
    pub location: Option<String>,

    #[validate(url(message = "Job URL must be a URL"), length(max = 2048))]
    pub job_url: Option<String>,

    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_min: Option<i64>,

    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_max: Option<i64>,

    #[validate(custom(function = "currency_code"))]
    pub salary_currency: Option<String>,

    pub stage: Option<Stage>,

    pub priority: Option<Priority>,

    #[validate(length(max = 100))]
    pub source: Option<String>,

    pub applied_at: Option<DateTime<Utc>>,

    #[validate(length(max = 10000))]
    pub notes: Option<String>,

    #[serde(default)]
    #[validate(length(max = 50, message = "At most 50 labels per application"))]
    pub label_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateApplicationRequest {
    #[validate(length(min = 1, max = 200, message = "Company must be 1-200 characters"))]
    pub company: Option<String>,

    #[validate(length(min = 1, max = 200, message = "Position must be 1-200 characters"))]
    pub position: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200))]
    pub location: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(url(message = "Job URL must be a URL"), length(max = 2048))]
    pub job_url: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_min: Option<Option<i64>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_max: Option<Option<i64>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(custom(function = "currency_code"))]
    pub salary_currency: Option<Option<String>>,

    pub stage: Option<Stage>,

    pub priority: Option<Priority>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 100))]
    pub source: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub applied_at: Option<Option<DateTime<Utc>>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10000))]
    pub notes: Option<Option<String>>,
}

/// List query; `page`/`per_page` are inline because `serde_urlencoded`
/// cannot parse numbers through `#[serde(flatten)]`
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub stage: Option<String>,
    pub label_id: Option<Uuid>,
    pub q: Option<String>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    fn into_filter(self) -> ApiResult<(ApplicationFilter, Pagination)> {
        let stage = self
            .stage
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Stage>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let filter = ApplicationFilter {
            stage,
            label_id: self.label_id,
            q: self.q,
            sort: self.sort.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
        };
        let pagination = Pagination::from(PageParams {
            page: self.page,
            per_page: self.per_page,
        });

        Ok((filter, pagination))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetLabelsRequest {
    #[validate(length(max = 50, message = "At most 50 labels per application"))]
    pub label_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttachDocumentRequest {
    pub document_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ApplicationDetail {
    #[serde(flatten)]
    pub application: Application,
    pub labels: Vec<Label>,
    pub documents: Vec<AttachedDocument>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub errors: Vec<RowError>,
}

fn check_salary_range(min: Option<i64>, max: Option<i64>) -> ApiResult<()> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(ApiError::field(
            "salary_max",
            "salary_max must be greater than or equal to salary_min",
        )),
        _ => Ok(()),
    }
}

async fn find_owned(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<Application> {
    Application::find(&state.db, user_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Application"))
}

async fn detail(state: &AppState, user_id: Uuid, application: Application) -> ApiResult<ApplicationDetail> {
    let labels = Label::for_application(&state.db, application.id).await?;
    let documents = AttachmentLink::list_for_application(&state.db, user_id, application.id).await?;

    Ok(ApplicationDetail {
        application,
        labels,
        documents,
    })
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Application>>> {
    let (filter, pagination) = params.into_filter()?;
    let (applications, total) = Application::list(&state.db, auth.user_id, &filter, pagination).await?;

    Ok(Json(Page::new(applications, pagination, total)))
}

/// Creates an application, optionally with labels
///
/// # Errors
///
/// - `403 Forbidden`: Plan application limit reached
/// - `422 Unprocessable Entity`: Invalid fields or unknown labels
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateApplicationRequest>,
) -> ApiResult<(StatusCode, Json<ApplicationDetail>)> {
    check_salary_range(req.salary_min, req.salary_max)?;
    ensure_owned(&state, Owned::Label, auth.user_id, &req.label_ids, "label_ids").await?;

    state
        .quota
        .enforce(auth.user_id, auth.plan, Resource::Applications, 1)
        .await?;

    let mut data = CreateApplication::new(req.company.trim(), req.position.trim());
    data.location = trimmed(req.location);
    data.job_url = req.job_url;
    data.salary_min = req.salary_min;
    data.salary_max = req.salary_max;
    data.salary_currency = req.salary_currency.map(|c| c.to_ascii_uppercase());
    data.stage = req.stage.unwrap_or(data.stage);
    data.priority = req.priority.unwrap_or(data.priority);
    data.source = trimmed(req.source);
    data.applied_at = req.applied_at;
    data.notes = req.notes;

    let mut tx = state.db.begin().await?;
    let application = Application::create(&mut tx, auth.user_id, data).await?;
    if !req.label_ids.is_empty() {
        Application::set_labels(&mut tx, application.id, &req.label_ids).await?;
    }
    tx.commit().await?;

    tracing::info!(
        user_id = %auth.user_id,
        application_id = %application.id,
        stage = %application.stage,
        "Application created"
    );

    let detail = detail(&state, auth.user_id, application).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApplicationDetail>> {
    let application = find_owned(&state, auth.user_id, id).await?;
    Ok(Json(detail(&state, auth.user_id, application).await?))
}

/// Applies a partial update
///
/// The salary range is checked against the merged result, so sending only
/// `salary_min` above the stored `salary_max` is rejected.
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateApplicationRequest>,
) -> ApiResult<Json<ApplicationDetail>> {
    let existing = find_owned(&state, auth.user_id, id).await?;

    check_salary_range(
        req.salary_min.unwrap_or(existing.salary_min),
        req.salary_max.unwrap_or(existing.salary_max),
    )?;

    let data = UpdateApplication {
        company: req.company.map(|c| c.trim().to_string()),
        position: req.position.map(|p| p.trim().to_string()),
        location: req.location.map(trimmed),
        job_url: req.job_url,
        salary_min: req.salary_min,
        salary_max: req.salary_max,
        salary_currency: req
            .salary_currency
            .map(|c| c.map(|c| c.to_ascii_uppercase())),
        stage: req.stage,
        priority: req.priority,
        source: req.source.map(trimmed),
        applied_at: req.applied_at,
        notes: req.notes,
    };

    let application = Application::update(&state.db, auth.user_id, id, data)
        .await?
        .ok_or_else(|| ApiError::not_found("Application"))?;

    if existing.stage != application.stage {
        tracing::info!(
            application_id = %id,
            from = %existing.stage,
            to = %application.stage,
            "Application stage changed"
        );
    }

    Ok(Json(detail(&state, auth.user_id, application).await?))
}

/// Soft-deletes the application and its interviews
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    if !Application::soft_delete(&state.db, auth.user_id, id).await? {
        return Err(ApiError::not_found("Application"));
    }

    tracing::info!(user_id = %auth.user_id, application_id = %id, "Application deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces the application's labels with exactly `label_ids`
pub async fn set_labels(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<SetLabelsRequest>,
) -> ApiResult<Json<DataResponse<Label>>> {
    find_owned(&state, auth.user_id, id).await?;
    ensure_owned(&state, Owned::Label, auth.user_id, &req.label_ids, "label_ids").await?;

    let mut label_ids = req.label_ids;
    label_ids.sort_unstable();
    label_ids.dedup();

    let mut tx = state.db.begin().await?;
    Application::set_labels(&mut tx, id, &label_ids).await?;
    tx.commit().await?;

    Ok(Json(DataResponse {
        data: Label::for_application(&state.db, id).await?,
    }))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<DataResponse<AttachedDocument>>> {
    find_owned(&state, auth.user_id, id).await?;

    Ok(Json(DataResponse {
        data: AttachmentLink::list_for_application(&state.db, auth.user_id, id).await?,
    }))
}

/// Links one of the caller's documents to the application
///
/// # Errors
///
/// - `404 Not Found`: Unknown application
/// - `409 Conflict`: Document already attached
/// - `422 Unprocessable Entity`: Unknown document
pub async fn attach_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(req): ValidatedJson<AttachDocumentRequest>,
) -> ApiResult<(StatusCode, Json<DataResponse<AttachedDocument>>)> {
    find_owned(&state, auth.user_id, id).await?;

    ensure_owned(&state, Owned::Document, auth.user_id, &[req.document_id], "document_id").await?;

    if !AttachmentLink::attach(&state.db, auth.user_id, id, req.document_id).await? {
        return Err(ApiError::Conflict("Document is already attached".to_string()));
    }

    let documents = AttachmentLink::list_for_application(&state.db, auth.user_id, id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: documents })))
}

pub async fn detach_document(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiPath((id, document_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    find_owned(&state, auth.user_id, id).await?;

    if !AttachmentLink::detach(&state.db, auth.user_id, id, document_id).await? {
        return Err(ApiError::not_found("Attachment"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Downloads every live application as CSV
pub async fn export(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let applications = Application::list_all(&state.db, auth.user_id).await?;
    let body = csv_io::export(&applications)?;

    let disposition = format!(
        "attachment; filename=\"applications-{}.csv\"",
        Utc::now().format("%Y-%m-%d")
    );

    tracing::debug!(user_id = %auth.user_id, rows = applications.len(), "Exported applications");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Imports applications from a CSV request body
///
/// Valid rows are inserted together; invalid rows come back in `errors`.
///
/// # Errors
///
/// - `400 Bad Request`: Empty or unparseable file
/// - `403 Forbidden`: FREE plan, or the batch would exceed the quota
/// - `422 Unprocessable Entity`: Missing required column or too many rows
pub async fn import(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: Client,
    body: Bytes,
) -> ApiResult<Json<ImportResponse>> {
    QuotaEnforcer::require_csv_import(auth.plan)?;

    let parsed = csv_io::parse_import(&body)?;

    let batch = u32::try_from(parsed.rows.len()).unwrap_or(u32::MAX);
    if batch > 0 {
        state
            .quota
            .enforce(auth.user_id, auth.plan, Resource::Applications, batch)
            .await?;
    }

    let created = Application::create_many(&state.db, auth.user_id, parsed.rows).await?;

    AuditLog::record(
        &state.db,
        AuditEntry::new(AuditAction::CsvImport)
            .user(auth.user_id)
            .metadata(serde_json::json!({
                "imported": created.len(),
                "rejected": parsed.errors.len(),
            }))
            .client(client.ip, client.user_agent),
    )
    .await;

    tracing::info!(
        user_id = %auth.user_id,
        imported = created.len(),
        rejected = parsed.errors.len(),
        "CSV import finished"
    );

    Ok(Json(ImportResponse {
        imported: created.len(),
        errors: parsed.errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salary_range() {
        assert!(check_salary_range(Some(50_000), Some(80_000)).is_ok());
        assert!(check_salary_range(Some(80_000), None).is_ok());
        assert!(check_salary_range(None, None).is_ok());
        assert!(check_salary_range(Some(90_000), Some(80_000)).is_err());
    }

    #[test]
    fn test_create_request_validation() {
        let req: CreateApplicationRequest = serde_json::from_str(
            r#"{"company": "", "position": "Engineer", "salary_min": -5, "salary_currency": "EURO"}"#,
        )
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("company"));
        assert!(fields.contains_key("salary_min"));
        assert!(fields.contains_key("salary_currency"));
        assert!(!fields.contains_key("position"));
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateApplicationRequest =
            serde_json::from_str(r#"{"company": "Acme", "position": "Engineer", "stage": "SAVED"}"#).unwrap();

        assert!(req.validate().is_ok());
        assert_eq!(req.stage, Some(Stage::Saved));
        assert!(req.label_ids.is_empty());
    }

    /// Request with `field` set to a value of `len` characters
    fn create_with(field: &str, len: usize) -> CreateApplicationRequest {
        let value = if field == "job_url" {
            let prefix = "https://example.com/";
            format!("{}{}", prefix, "a".repeat(len - prefix.len()))
        } else {
            "a".repeat(len)
        };

        let mut body = serde_json::json!({ "company": "Acme", "position": "Engineer" });
        body[field] = serde_json::Value::String(value);
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_create_request_matches_import_limits() {
        use applytrack_shared::models::application::{
            MAX_COMPANY_LEN, MAX_JOB_URL_LEN, MAX_LOCATION_LEN, MAX_NOTES_LEN, MAX_POSITION_LEN,
            MAX_SOURCE_LEN,
        };

        let limits = [
            ("company", MAX_COMPANY_LEN),
            ("position", MAX_POSITION_LEN),
            ("location", MAX_LOCATION_LEN),
            ("job_url", MAX_JOB_URL_LEN),
            ("source", MAX_SOURCE_LEN),
            ("notes", MAX_NOTES_LEN),
        ];

        for (field, max) in limits {
            assert!(create_with(field, max).validate().is_ok(), "{}", field);

            let errors = create_with(field, max + 1).validate().unwrap_err();
            assert!(errors.field_errors().contains_key(field), "{}", field);
        }
    }

    #[test]
    fn test_update_request_null_clears() {
        let req: UpdateApplicationRequest =
            serde_json::from_str(r#"{"salary_max": null, "notes": "call back"}"#).unwrap();

        assert_eq!(req.salary_max, Some(None));
        assert_eq!(req.salary_min, None);
        assert_eq!(req.notes, Some(Some("call back".to_string())));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_list_params_parse_stage_loosely() {
        let params = ListParams {
            stage: Some("interview".to_string()),
            per_page: Some(500),
            ..Default::default()
        };
        let (filter, pagination) = params.into_filter().unwrap();

        assert_eq!(filter.stage, Some(Stage::Interview));
        assert_eq!(filter.sort, SortField::CreatedAt);
        assert_eq!(pagination.per_page, 100);
    }

    #[test]
    fn test_list_params_reject_unknown_stage() {
        let params = ListParams {
            stage: Some("hired".to_string()),
            ..Default::default()
        };
        assert!(matches!(params.into_filter(), Err(ApiError::BadRequest(_))));
    }
}
