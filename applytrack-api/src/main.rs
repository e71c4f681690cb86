//! # ApplyTrack API Server
//!
//! REST API for tracking job applications: accounts and sessions, the
//! application pipeline with interviews, tasks, contacts, documents and
//! labels, dashboard analytics, CSV import/export and subscription billing.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/applytrack \
//! JWT_SECRET=change-me-to-a-long-random-secret-value \
//! cargo run -p applytrack-api
//! ```

use applytrack_api::{
    app::{build_router, AppState},
    config::Config,
    middleware::rate_limit::RateLimiter,
};
use applytrack_shared::db::{migrations::run_migrations, pool::create_pool};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often idle throttle entries and rate-limit buckets are dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "applytrack_api=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn rate_limiter(config: &Config) -> RateLimiter {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("REDIS_URL not set, rate limiting is per process");
        return RateLimiter::in_memory();
    };

    match RateLimiter::connect(url).await {
        Ok(limiter) => {
            tracing::info!("Rate limiting backed by Redis");
            limiter
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, rate limiting is per process");
            RateLimiter::in_memory()
        }
    }
}

fn spawn_pruner(state: &AppState) {
    let throttle = Arc::clone(&state.throttle);
    let limiter = Arc::clone(&state.rate_limiter);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let throttled = throttle.prune(Instant::now());
            let buckets = limiter.prune();
            if throttled + buckets > 0 {
                tracing::debug!(throttled, buckets, "Pruned idle limiter entries");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("ApplyTrack API v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let bind_address = config.bind_address();

    let pool = create_pool(config.database.clone()).await?;
    run_migrations(&pool).await?;

    let limiter = rate_limiter(&config).await;
    let state = AppState::new(pool.clone(), config)?.with_rate_limiter(limiter);
    spawn_pruner(&state);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on http://{}", bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Server stopped");

    Ok(())
}
