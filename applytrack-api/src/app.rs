/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use applytrack_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = applytrack_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    error::ApiError,
    middleware::{
        auth::session_auth_layer,
        rate_limit::{rate_limit_layer, RateLimiter},
        security::SecurityHeadersLayer,
    },
};
use applytrack_shared::{
    auth::throttle::{LoginThrottle, ThrottleConfig},
    billing::{PaymentProvider, StripeClient},
    mail::{LogMailer, Mailer, SmtpMailer},
    oauth::OAuthProviders,
    plan::QuotaEnforcer,
};
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor; every field
/// is a pool or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,

    pub config: Arc<Config>,

    /// Failed-login lockouts, process-local
    pub throttle: Arc<LoginThrottle>,

    pub rate_limiter: Arc<RateLimiter>,

    pub mailer: Arc<dyn Mailer>,

    /// `None` when billing isn't configured
    pub payments: Option<Arc<dyn PaymentProvider>>,

    pub oauth: Arc<OAuthProviders>,

    pub quota: QuotaEnforcer,
}

impl AppState {
    /// Builds state from configuration
    ///
    /// Uses SMTP when configured (log-only mail otherwise), Stripe when
    /// configured, and in-memory rate limiting until
    /// [`with_rate_limiter`](Self::with_rate_limiter) swaps in Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if an integration client can't be constructed.
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                tracing::warn!("SMTP not configured, outgoing email will only be logged");
                Arc::new(LogMailer::default())
            }
        };

        let payments: Option<Arc<dyn PaymentProvider>> = match &config.stripe {
            Some(stripe) => Some(Arc::new(StripeClient::new(stripe.clone())?)),
            None => None,
        };

        let oauth = OAuthProviders::new(config.google.clone(), config.github.clone())?;

        Ok(Self {
            quota: QuotaEnforcer::new(db.clone()),
            db,
            config: Arc::new(config),
            throttle: Arc::new(LoginThrottle::new(ThrottleConfig::default())),
            rate_limiter: Arc::new(RateLimiter::in_memory()),
            mailer,
            payments,
            oauth: Arc::new(oauth),
        })
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Arc::new(rate_limiter);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// Gets JWT secret for challenge and OAuth state tokens
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// The payment provider, or 503 when billing is off
    pub fn payments(&self) -> Result<&Arc<dyn PaymentProvider>, ApiError> {
        self.payments
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Billing is not configured".to_string()))
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # public
/// └── /v1/
///     ├── /auth/register, /login       # public
///     ├── /auth/password/*             # public
///     ├── /auth/2fa/verify             # public (challenge token)
///     ├── /auth/oauth/:provider[/callback]
///     ├── /billing/webhook             # public (signature verified)
///     └── everything else              # session + rate limit
/// ```
///
/// # Middleware Stack
///
/// Outermost first: security headers, CORS, tracing, compression, then for protected
/// routes session authentication followed by per-user rate limiting.
pub fn build_router(state: AppState) -> Router {
    use crate::routes::{
        account, applications, auth, billing, contacts, dashboard, documents, health, interviews,
        labels, oauth, sessions, tasks, two_factor,
    };

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/password/forgot", post(auth::forgot_password))
        .route("/auth/password/reset", post(auth::reset_password))
        .route("/auth/2fa/verify", post(two_factor::verify))
        .route("/auth/oauth/:provider", get(oauth::authorize))
        .route("/auth/oauth/:provider/callback", get(oauth::callback))
        .route("/billing/webhook", post(billing::webhook));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/2fa/setup", post(two_factor::setup))
        .route("/auth/2fa/enable", post(two_factor::enable))
        .route("/auth/2fa/disable", post(two_factor::disable))
        .route(
            "/account",
            get(account::get_account)
                .patch(account::update_account)
                .delete(account::delete_account),
        )
        .route("/account/password", post(account::change_password))
        .route(
            "/account/email-preferences",
            get(account::get_email_preferences).put(account::update_email_preferences),
        )
        .route("/account/audit-log", get(account::audit_log))
        .route(
            "/sessions",
            get(sessions::list_sessions).delete(sessions::revoke_other_sessions),
        )
        .route("/sessions/:id", delete(sessions::revoke_session))
        .route(
            "/applications",
            get(applications::list).post(applications::create),
        )
        .route("/applications/export", get(applications::export))
        .route("/applications/import", post(applications::import))
        .route(
            "/applications/:id",
            get(applications::get)
                .patch(applications::update)
                .delete(applications::delete),
        )
        .route("/applications/:id/labels", put(applications::set_labels))
        .route(
            "/applications/:id/documents",
            get(applications::list_documents).post(applications::attach_document),
        )
        .route(
            "/applications/:id/documents/:document_id",
            delete(applications::detach_document),
        )
        .route("/interviews", get(interviews::list).post(interviews::create))
        .route(
            "/interviews/:id",
            get(interviews::get)
                .patch(interviews::update)
                .delete(interviews::delete),
        )
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/tasks/:id",
            get(tasks::get).patch(tasks::update).delete(tasks::delete),
        )
        .route("/tasks/:id/complete", post(tasks::complete))
        .route("/tasks/:id/reopen", post(tasks::reopen))
        .route("/contacts", get(contacts::list).post(contacts::create))
        .route(
            "/contacts/:id",
            get(contacts::get)
                .patch(contacts::update)
                .delete(contacts::delete),
        )
        .route("/documents", get(documents::list).post(documents::create))
        .route(
            "/documents/:id",
            get(documents::get)
                .patch(documents::update)
                .delete(documents::delete),
        )
        .route("/labels", get(labels::list).post(labels::create))
        .route(
            "/labels/:id",
            get(labels::get).patch(labels::update).delete(labels::delete),
        )
        .route("/dashboard/stats", get(dashboard::stats))
        .route("/dashboard/calendar", get(dashboard::calendar))
        .route("/billing", get(billing::summary))
        .route("/billing/checkout", post(billing::checkout))
        .route("/billing/portal", post(billing::portal))
        // route_layer so unmatched paths still 404 instead of 401
        .route_layer(from_fn_with_state(state.clone(), rate_limit_layer))
        .route_layer(from_fn_with_state(state.clone(), session_auth_layer));

    let v1_routes = public_routes.merge(protected_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .expose_headers([
                header::RETRY_AFTER,
                header::CONTENT_DISPOSITION,
                header::HeaderName::from_static("x-ratelimit-limit"),
                header::HeaderName::from_static("x-ratelimit-remaining"),
            ])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/v1", v1_routes)
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}
