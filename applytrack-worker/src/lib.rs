//! # ApplyTrack Worker Library
//!
//! Periodic background jobs that run beside the API server.
//!
//! ## Modules
//!
//! - `config`: Environment configuration
//! - `reminders`: Interview and task reminder emails
//! - `cleanup`: Purging stale sessions and reset tokens
//! - `scheduler`: Tick loop with graceful shutdown
//!
//! ## Example
//!
//! ```no_run
//! use applytrack_shared::mail::LogMailer;
//! use applytrack_worker::{config::WorkerConfig, scheduler::Scheduler};
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! # async fn example(pool: PgPool) -> anyhow::Result<()> {
//! let config = WorkerConfig::from_env()?;
//! let scheduler = Scheduler::new(pool, Arc::new(LogMailer::default()), config.schedule);
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod reminders;
pub mod scheduler;
