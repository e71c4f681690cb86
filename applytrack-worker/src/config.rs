/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `REMINDER_INTERVAL_SECS`: seconds between ticks (default 300)
/// - `REMINDER_BATCH_SIZE`: reminders of each kind sent per tick (default 100)
/// - `SESSION_RETENTION_DAYS`: how long dead sessions are kept (default 7)
/// - `SMTP_*`: outbound mail relay; reminders are only logged when unset

use applytrack_shared::{db::pool::DatabaseConfig, mail::SmtpConfig};
use std::{env, time::Duration};

pub const DEFAULT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_SESSION_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,

    pub smtp: Option<SmtpConfig>,

    pub schedule: ScheduleConfig,
}

/// What each tick does and how often
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,

    pub batch_size: i64,

    pub session_retention: chrono::Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            session_retention: chrono::Duration::days(DEFAULT_SESSION_RETENTION_DAYS),
        }
    }
}

/// Parses a positive integer variable, `default` when unset
fn positive(name: &str, value: Option<String>, default: i64) -> anyhow::Result<i64> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };

    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => anyhow::bail!("{} must be a positive integer, got '{}'", name, raw),
    }
}

impl ScheduleConfig {
    /// Builds the schedule from raw variable values
    pub fn from_values(
        interval_secs: Option<String>,
        batch_size: Option<String>,
        retention_days: Option<String>,
    ) -> anyhow::Result<Self> {
        let interval = positive("REMINDER_INTERVAL_SECS", interval_secs, DEFAULT_INTERVAL_SECS as i64)?;

        Ok(Self {
            interval: Duration::from_secs(interval as u64),
            batch_size: positive("REMINDER_BATCH_SIZE", batch_size, DEFAULT_BATCH_SIZE)?,
            session_retention: chrono::Duration::days(positive(
                "SESSION_RETENTION_DAYS",
                retention_days,
                DEFAULT_SESSION_RETENTION_DAYS,
            )?),
        })
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a number is malformed.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            schedule: ScheduleConfig::from_values(
                env::var("REMINDER_INTERVAL_SECS").ok(),
                env::var("REMINDER_BATCH_SIZE").ok(),
                env::var("SESSION_RETENTION_DAYS").ok(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let schedule = ScheduleConfig::from_values(None, None, Some("  ".to_string())).unwrap();

        assert_eq!(schedule.interval, Duration::from_secs(300));
        assert_eq!(schedule.batch_size, 100);
        assert_eq!(schedule.session_retention, chrono::Duration::days(7));
    }

    #[test]
    fn test_overrides() {
        let schedule = ScheduleConfig::from_values(
            Some("60".to_string()),
            Some("25".to_string()),
            Some("30".to_string()),
        )
        .unwrap();

        assert_eq!(schedule.interval, Duration::from_secs(60));
        assert_eq!(schedule.batch_size, 25);
        assert_eq!(schedule.session_retention, chrono::Duration::days(30));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ScheduleConfig::from_values(Some("0".to_string()), None, None).is_err());
        assert!(ScheduleConfig::from_values(Some("five".to_string()), None, None).is_err());
        assert!(ScheduleConfig::from_values(None, Some("-3".to_string()), None).is_err());
    }
}
