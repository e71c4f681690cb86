/// Error handling for the API server
///
/// Every handler returns `ApiResult<T>`; failures render as the JSON envelope
/// `{ "code": "...", "message": "...", "details": [...] }` with the matching
/// HTTP status.
///
/// # Example
///
/// ```
/// use applytrack_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler() -> ApiResult<Json<serde_json::Value>> {
///     Err(ApiError::NotFound("Application not found".to_string()))
/// }
/// ```

use applytrack_shared::{
    auth::{
        jwt::JwtError, middleware::AuthError, password::PasswordError, throttle::Locked,
        totp::TotpError,
    },
    billing::BillingError,
    csv_io::CsvError,
    mail::MailError,
    oauth::OAuthError,
    plan::QuotaError,
};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input (400)
    BadRequest(String),

    /// Missing, invalid or expired credentials (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Plan limit or PRO-only feature (403)
    PlanLimit(String),

    /// Not found or not owned by the caller (404)
    NotFound(String),

    /// Conflict (409), e.g. duplicate email
    Conflict(String),

    /// Unprocessable entity (422)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Too many requests (429)
    RateLimitExceeded { retry_after: u64, message: String },

    /// Upstream provider failure (502)
    BadGateway(String),

    /// Internal server error (500)
    InternalError(String),

    /// Optional integration not configured (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code, e.g. `not_found`
    pub code: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation failure
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn not_found(resource: &str) -> Self {
        ApiError::NotFound(format!("{} not found", resource))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::PlanLimit(_) => "plan_limit_reached",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::PlanLimit(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::PlanLimit(msg) => write!(f, "Plan limit reached: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::RateLimitExceeded { message, .. } => write!(f, "Rate limit exceeded: {}", message),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let retry_after = match &self {
            ApiError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let (message, details) = match self {
            ApiError::ValidationError(errors) => ("Request validation failed".to_string(), Some(errors)),
            ApiError::InternalError(msg) => {
                // details stay in the log
                tracing::error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), None)
            }
            ApiError::BadGateway(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                ("An upstream provider request failed".to_string(), None)
            }
            ApiError::RateLimitExceeded { message, .. } => (message, None),
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::PlanLimit(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, None),
        };

        let body = Json(ErrorResponse {
            code: code.to_string(),
            message,
            details,
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
        }
        response
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // unique violations
                if db_err.code().as_deref() == Some("23505") {
                    return match db_err.constraint() {
                        Some(c) if c.contains("email") => {
                            ApiError::Conflict("Email already registered".to_string())
                        }
                        Some(c) if c.starts_with("labels_") => {
                            ApiError::Conflict("A label with this name already exists".to_string())
                        }
                        _ => ApiError::Conflict("Resource already exists".to_string()),
                    };
                }

                // check constraints
                if db_err.code().as_deref() == Some("23514") {
                    return ApiError::ValidationError(vec![ValidationErrorDetail {
                        field: db_err.constraint().unwrap_or("body").to_string(),
                        message: "Value violates a constraint".to_string(),
                    }]);
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert validator errors to API errors
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", error.code)),
                })
            })
            .collect();

        // stable order; schema-level failures come through as `__all__`
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::ValidationError(details)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Missing credentials".to_string()),
            AuthError::InvalidFormat(msg) => ApiError::Unauthorized(msg),
            AuthError::InvalidSession => ApiError::Unauthorized("Invalid or expired session".to_string()),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<Locked> for ApiError {
    fn from(locked: Locked) -> Self {
        ApiError::RateLimitExceeded {
            retry_after: locked.retry_after.as_secs().max(1),
            message: locked.to_string(),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::CreateError(_) => ApiError::InternalError(err.to_string()),
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            _ => ApiError::Unauthorized("Invalid token".to_string()),
        }
    }
}

impl From<TotpError> for ApiError {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::MalformedCode => ApiError::field("code", err.to_string()),
            TotpError::InvalidSecret => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Database(e) => e.into(),
            other => ApiError::PlanLimit(other.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature(reason) => {
                ApiError::BadRequest(format!("Invalid webhook signature: {}", reason))
            }
            BillingError::MalformedEvent(msg) => ApiError::BadRequest(format!("Malformed event: {}", msg)),
            BillingError::Provider(_) | BillingError::Network(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownProvider(_) => ApiError::NotFound(err.to_string()),
            OAuthError::NotConfigured(_) => ApiError::ServiceUnavailable(err.to_string()),
            OAuthError::TokenExchange(_) => ApiError::BadRequest(err.to_string()),
            OAuthError::Profile(_) | OAuthError::Network(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::InvalidAddress(_) => ApiError::field("email", err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<CsvError> for ApiError {
    fn from(err: CsvError) -> Self {
        match err {
            CsvError::Write(_) => ApiError::InternalError(err.to_string()),
            CsvError::MissingColumn(_) | CsvError::TooManyRows(_) => ApiError::field("file", err.to_string()),
            CsvError::Empty | CsvError::Parse(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applytrack_shared::plan::Resource;
    use std::time::Duration;

    async fn body_json(err: ApiError) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::not_found("Application");
        assert_eq!(err.to_string(), "Not found: Application not found");
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let (status, _, body) = body_json(ApiError::not_found("Task")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        assert_eq!(body["message"], "Task not found");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_validation_details() {
        let (status, _, body) = body_json(ApiError::field("company", "Company is required")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["details"][0]["field"], "company");
        assert_eq!(body["details"][0]["message"], "Company is required");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, _, body) = body_json(ApiError::InternalError("connection refused".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_locked_maps_to_429_with_retry_after() {
        let err: ApiError = Locked { retry_after: Duration::from_secs(42) }.into();
        let (status, headers, body) = body_json(err).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "42");
        assert_eq!(body["code"], "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn test_quota_maps_to_plan_limit() {
        let err: ApiError = QuotaError::LimitExceeded {
            resource: Resource::Applications,
            limit: 50,
            current: 50,
            requested: 1,
        }
        .into();
        let (status, _, body) = body_json(err).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "plan_limit_reached");
    }

    #[test]
    fn test_billing_error_mapping() {
        let err: ApiError = BillingError::InvalidSignature("signature mismatch").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = BillingError::Provider("card declined".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_auth_error_mapping() {
        let err: ApiError = AuthError::InvalidSession.into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err: ApiError = AuthError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
