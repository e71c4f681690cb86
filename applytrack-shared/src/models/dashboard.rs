/// Read-only analytics for the dashboard
///
/// Everything here is computed from live rows of a single user. The pure
/// helpers (`response_rate`, `weekly_series`) are separate from the queries
/// so the arithmetic can be tested without a database.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::application::Stage;
use super::interview::InterviewKind;

/// Weeks covered by the activity series
pub const ACTIVITY_WEEKS: usize = 12;

/// Widest calendar range a client may request
pub const MAX_CALENDAR_DAYS: i64 = 93;

/// Days ahead counted as "upcoming"
const UPCOMING_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageCount {
    pub stage: Stage,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WeekCount {
    /// Monday of the ISO week
    pub week_start: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_applications: i64,
    pub by_stage: Vec<StageCount>,
    /// Percent of submitted applications that got past APPLIED, 1 decimal
    pub response_rate: f64,
    /// Applications at OFFER or ACCEPTED
    pub offers: i64,
    pub upcoming_interviews: i64,
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    pub weekly_activity: Vec<WeekCount>,
}

/// Calendar entry
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalendarEvent {
    Interview {
        id: Uuid,
        application_id: Uuid,
        company: String,
        position: String,
        kind: InterviewKind,
        at: DateTime<Utc>,
        duration_minutes: Option<i32>,
    },
    Task {
        id: Uuid,
        application_id: Option<Uuid>,
        title: String,
        at: DateTime<Utc>,
    },
}

impl CalendarEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            CalendarEvent::Interview { at, .. } | CalendarEvent::Task { at, .. } => *at,
        }
    }
}

/// Zero-filled per-stage counts in pipeline order
pub fn stage_counts(rows: &[(Stage, i64)]) -> Vec<StageCount> {
    let counts: HashMap<Stage, i64> = rows.iter().copied().collect();
    Stage::ALL
        .into_iter()
        .map(|stage| StageCount {
            stage,
            count: counts.get(&stage).copied().unwrap_or(0),
        })
        .collect()
}

/// Responded / submitted as a percentage rounded to one decimal
pub fn response_rate(by_stage: &[StageCount]) -> f64 {
    let submitted: i64 = by_stage
        .iter()
        .filter(|c| c.stage.is_submitted())
        .map(|c| c.count)
        .sum();
    let responded: i64 = by_stage
        .iter()
        .filter(|c| c.stage.has_response())
        .map(|c| c.count)
        .sum();

    if submitted == 0 {
        return 0.0;
    }

    (responded as f64 * 1000.0 / submitted as f64).round() / 10.0
}

/// Monday of the ISO week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Last `ACTIVITY_WEEKS` weeks ending with the current one, oldest first
pub fn weekly_series(today: NaiveDate, rows: &[(NaiveDate, i64)]) -> Vec<WeekCount> {
    let counts: HashMap<NaiveDate, i64> = rows.iter().copied().collect();
    let current = week_start(today);

    (0..ACTIVITY_WEEKS)
        .rev()
        .map(|weeks_back| {
            let start = current - Duration::weeks(weeks_back as i64);
            WeekCount {
                week_start: start,
                count: counts.get(&start).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// UTC midnight starting the oldest week of [`weekly_series`]
pub fn activity_since(today: NaiveDate) -> DateTime<Utc> {
    let oldest = week_start(today) - Duration::weeks(ACTIVITY_WEEKS as i64 - 1);
    oldest.and_time(NaiveTime::MIN).and_utc()
}

pub struct Dashboard;

impl Dashboard {
    pub async fn stats(pool: &PgPool, user_id: Uuid) -> Result<DashboardStats, sqlx::Error> {
        let now = Utc::now();

        let stage_rows: Vec<(Stage, i64)> = sqlx::query_as(
            "SELECT stage, COUNT(*) FROM job_applications \
             WHERE user_id = $1 AND deleted_at IS NULL GROUP BY stage",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let by_stage = stage_counts(&stage_rows);
        let total_applications = by_stage.iter().map(|c| c.count).sum();
        let offers = by_stage
            .iter()
            .filter(|c| matches!(c.stage, Stage::Offer | Stage::Accepted))
            .map(|c| c.count)
            .sum();

        let upcoming_interviews: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM interviews i
            JOIN job_applications a ON a.id = i.application_id AND a.deleted_at IS NULL
            WHERE i.user_id = $1 AND i.deleted_at IS NULL AND i.outcome = 'PENDING'
              AND i.scheduled_at >= $2 AND i.scheduled_at < $3
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now + Duration::days(UPCOMING_DAYS))
        .fetch_one(pool)
        .await?;

        let (open_tasks, overdue_tasks): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE completed_at IS NULL),
                   COUNT(*) FILTER (WHERE completed_at IS NULL AND due_at < $2)
            FROM tasks
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(pool)
        .await?;

        let today = now.date_naive();

        let week_rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT date_trunc('week', created_at AT TIME ZONE 'UTC')::date AS week, COUNT(*)
            FROM job_applications
            WHERE user_id = $1 AND deleted_at IS NULL
              AND created_at >= $2
            GROUP BY week
            "#,
        )
        .bind(user_id)
        .bind(activity_since(today))
        .fetch_all(pool)
        .await?;

        Ok(DashboardStats {
            total_applications,
            response_rate: response_rate(&by_stage),
            by_stage,
            offers,
            upcoming_interviews,
            open_tasks,
            overdue_tasks,
            weekly_activity: weekly_series(today, &week_rows),
        })
    }

    /// Interviews and open tasks in `[from, to)`, by time
    pub async fn calendar(
        pool: &PgPool,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, sqlx::Error> {
        let interviews: Vec<(Uuid, Uuid, String, String, InterviewKind, DateTime<Utc>, Option<i32>)> =
            sqlx::query_as(
                r#"
                SELECT i.id, i.application_id, a.company, a.position, i.kind, i.scheduled_at, i.duration_minutes
                FROM interviews i
                JOIN job_applications a ON a.id = i.application_id AND a.deleted_at IS NULL
                WHERE i.user_id = $1 AND i.deleted_at IS NULL
                  AND i.scheduled_at >= $2 AND i.scheduled_at < $3
                "#,
            )
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?;

        let tasks: Vec<(Uuid, Option<Uuid>, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, application_id, title, due_at
            FROM tasks
            WHERE user_id = $1 AND deleted_at IS NULL AND completed_at IS NULL
              AND due_at >= $2 AND due_at < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;

        let mut events: Vec<CalendarEvent> = interviews
            .into_iter()
            .map(
                |(id, application_id, company, position, kind, at, duration_minutes)| {
                    CalendarEvent::Interview {
                        id,
                        application_id,
                        company,
                        position,
                        kind,
                        at,
                        duration_minutes,
                    }
                },
            )
            .chain(tasks.into_iter().map(|(id, application_id, title, at)| {
                CalendarEvent::Task {
                    id,
                    application_id,
                    title,
                    at,
                }
            }))
            .collect();

        events.sort_by_key(CalendarEvent::at);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_stage_counts_zero_filled() {
        let counts = stage_counts(&[(Stage::Offer, 2), (Stage::Applied, 5)]);
        assert_eq!(counts.len(), 8);
        assert_eq!(counts[0], StageCount { stage: Stage::Saved, count: 0 });
        assert_eq!(counts[1], StageCount { stage: Stage::Applied, count: 5 });
        assert_eq!(counts[4], StageCount { stage: Stage::Offer, count: 2 });
    }

    #[test]
    fn test_response_rate() {
        // 10 submitted (5 applied, 3 screening, 1 rejected, 1 withdrawn), 4 responded
        let counts = stage_counts(&[
            (Stage::Saved, 7),
            (Stage::Applied, 5),
            (Stage::Screening, 3),
            (Stage::Rejected, 1),
            (Stage::Withdrawn, 1),
        ]);
        assert_eq!(response_rate(&counts), 40.0);
    }

    #[test]
    fn test_response_rate_rounding_and_empty() {
        let counts = stage_counts(&[(Stage::Applied, 2), (Stage::Interview, 1)]);
        assert_eq!(response_rate(&counts), 33.3);

        assert_eq!(response_rate(&stage_counts(&[(Stage::Saved, 3)])), 0.0);
        assert_eq!(response_rate(&stage_counts(&[])), 0.0);
    }

    #[test]
    fn test_week_start_is_monday() {
        // 2024-01-03 is a Wednesday
        assert_eq!(week_start(date(2024, 1, 3)), date(2024, 1, 1));
        assert_eq!(week_start(date(2024, 1, 1)), date(2024, 1, 1));
        assert_eq!(week_start(date(2024, 1, 7)), date(2024, 1, 1));
    }

    #[test]
    fn test_weekly_series() {
        let today = date(2024, 3, 20);
        let series = weekly_series(today, &[(date(2024, 3, 18), 4), (date(2024, 1, 1), 9)]);

        assert_eq!(series.len(), ACTIVITY_WEEKS);
        assert_eq!(series.last().unwrap(), &WeekCount { week_start: date(2024, 3, 18), count: 4 });
        assert_eq!(series[0].week_start, date(2024, 1, 1));
        assert_eq!(series[0].count, 9);
        assert!(series[1..11].iter().all(|w| w.count == 0));
    }

    #[test]
    fn test_activity_since_is_utc_midnight_of_oldest_week() {
        let today = date(2024, 3, 20);
        let since = activity_since(today);

        assert_eq!(since, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(since.date_naive(), weekly_series(today, &[])[0].week_start);
    }

    #[test]
    fn test_calendar_event_serialization() {
        let at = Utc::now();
        let event = CalendarEvent::Task {
            id: Uuid::nil(),
            application_id: None,
            title: "Follow up".to_string(),
            at,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task");
        assert_eq!(json["title"], "Follow up");
        assert_eq!(event.at(), at);
    }
}
