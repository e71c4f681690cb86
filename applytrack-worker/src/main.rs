//! # ApplyTrack Worker
//!
//! Background process that sends interview and task reminder emails and
//! purges stale sessions and password reset tokens.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/applytrack \
//! REMINDER_INTERVAL_SECS=300 \
//! cargo run -p applytrack-worker
//! ```

use applytrack_shared::{
    db::{migrations::run_migrations, pool::create_pool},
    mail::{LogMailer, Mailer, SmtpMailer},
};
use applytrack_worker::{config::WorkerConfig, scheduler::Scheduler};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "applytrack_worker=debug,applytrack_shared=info".into());

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("ApplyTrack Worker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(config.database.clone()).await?;
    run_migrations(&pool).await?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
        None => {
            tracing::warn!("SMTP not configured, reminders will only be logged");
            Arc::new(LogMailer::default())
        }
    };

    let scheduler = Scheduler::new(pool.clone(), mailer, config.schedule);

    let token = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received, finishing current tick"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
        }
        token.cancel();
    });

    scheduler.run().await;

    pool.close().await;
    tracing::info!("Worker stopped");

    Ok(())
}
