/// Reminder emails for upcoming interviews and due tasks
///
/// Each pass loads what is due, sends one email per item and stamps
/// `reminder_sent_at` only after the send succeeded. A failed send leaves
/// the row unmarked so the next pass retries it.
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::mail::LogMailer;
/// use applytrack_worker::reminders::{PgReminderStore, Reminders};
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example(pool: PgPool) -> Result<(), applytrack_worker::reminders::ReminderError> {
/// let reminders = Reminders::new(Arc::new(PgReminderStore::new(pool)), Arc::new(LogMailer::default()), 100);
/// let report = reminders.send_due().await?;
/// println!("sent {} reminders", report.sent());
/// # Ok(())
/// # }
/// ```

use applytrack_shared::{
    mail::{templates, Email, Mailer},
    models::{
        interview::{Interview, InterviewReminder},
        task::{Task, TaskReminder},
    },
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where due reminders come from and where delivery is recorded
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn due_interviews(&self, limit: i64) -> Result<Vec<InterviewReminder>, sqlx::Error>;

    async fn due_tasks(&self, limit: i64) -> Result<Vec<TaskReminder>, sqlx::Error>;

    async fn mark_interview_sent(&self, id: Uuid) -> Result<(), sqlx::Error>;

    async fn mark_task_sent(&self, id: Uuid) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgReminderStore {
    db: PgPool,
}

impl PgReminderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn due_interviews(&self, limit: i64) -> Result<Vec<InterviewReminder>, sqlx::Error> {
        Interview::due_for_reminder(&self.db, limit).await
    }

    async fn due_tasks(&self, limit: i64) -> Result<Vec<TaskReminder>, sqlx::Error> {
        Task::due_for_reminder(&self.db, limit).await
    }

    async fn mark_interview_sent(&self, id: Uuid) -> Result<(), sqlx::Error> {
        Interview::mark_reminded(&self.db, id).await
    }

    async fn mark_task_sent(&self, id: Uuid) -> Result<(), sqlx::Error> {
        Task::mark_reminded(&self.db, id).await
    }
}

/// Outcome of one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub interviews_sent: usize,
    pub tasks_sent: usize,
    pub failed: usize,
}

impl ReminderReport {
    pub fn sent(&self) -> usize {
        self.interviews_sent + self.tasks_sent
    }
}

pub struct Reminders {
    store: Arc<dyn ReminderStore>,
    mailer: Arc<dyn Mailer>,
    batch_size: i64,
}

impl Reminders {
    pub fn new(store: Arc<dyn ReminderStore>, mailer: Arc<dyn Mailer>, batch_size: i64) -> Self {
        Self {
            store,
            mailer,
            batch_size,
        }
    }

    /// Sends at most one batch of interview reminders and one of task reminders
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails; mail failures are counted
    /// in the report and retried next pass.
    pub async fn send_due(&self) -> Result<ReminderReport, ReminderError> {
        let mut report = ReminderReport::default();

        for reminder in self.store.due_interviews(self.batch_size).await? {
            if self.deliver(templates::interview_reminder(&reminder), reminder.id, "interview").await {
                self.store.mark_interview_sent(reminder.id).await?;
                report.interviews_sent += 1;
            } else {
                report.failed += 1;
            }
        }

        for reminder in self.store.due_tasks(self.batch_size).await? {
            if self.deliver(templates::task_reminder(&reminder), reminder.id, "task").await {
                self.store.mark_task_sent(reminder.id).await?;
                report.tasks_sent += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    async fn deliver(&self, email: Email, id: Uuid, kind: &'static str) -> bool {
        match self.mailer.send(email).await {
            Ok(()) => {
                tracing::debug!(%id, kind, "Reminder sent");
                true
            }
            Err(e) => {
                tracing::warn!(%id, kind, error = %e, "Reminder not sent, will retry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applytrack_shared::{mail::MemoryMailer, models::interview::InterviewKind};
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        interviews: Vec<InterviewReminder>,
        tasks: Vec<TaskReminder>,
        marked: Mutex<Vec<Uuid>>,
        fail_marking: bool,
    }

    #[async_trait]
    impl ReminderStore for FakeStore {
        async fn due_interviews(&self, limit: i64) -> Result<Vec<InterviewReminder>, sqlx::Error> {
            let marked = self.marked.lock().unwrap();
            Ok(self
                .interviews
                .iter()
                .filter(|r| !marked.contains(&r.id))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn due_tasks(&self, limit: i64) -> Result<Vec<TaskReminder>, sqlx::Error> {
            let marked = self.marked.lock().unwrap();
            Ok(self
                .tasks
                .iter()
                .filter(|r| !marked.contains(&r.id))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_interview_sent(&self, id: Uuid) -> Result<(), sqlx::Error> {
            if self.fail_marking {
                return Err(sqlx::Error::PoolTimedOut);
            }
            self.marked.lock().unwrap().push(id);
            Ok(())
        }

        async fn mark_task_sent(&self, id: Uuid) -> Result<(), sqlx::Error> {
            self.marked.lock().unwrap().push(id);
            Ok(())
        }
    }

    fn interview(email: &str) -> InterviewReminder {
        InterviewReminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: Some("Ada".to_string()),
            company: "Acme".to_string(),
            position: "Engineer".to_string(),
            kind: InterviewKind::Video,
            scheduled_at: Utc::now() + Duration::hours(3),
            location: None,
        }
    }

    fn task(email: &str) -> TaskReminder {
        TaskReminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: None,
            title: "Send thank-you note".to_string(),
            due_at: Utc::now() + Duration::hours(5),
            company: Some("Acme".to_string()),
        }
    }

    #[tokio::test]
    async fn test_sends_and_marks() {
        let store = Arc::new(FakeStore {
            interviews: vec![interview("ada@example.com")],
            tasks: vec![task("ada@example.com"), task("bob@example.com")],
            ..FakeStore::default()
        });
        let mailer = Arc::new(MemoryMailer::new());
        let reminders = Reminders::new(store.clone(), mailer.clone(), 10);

        let report = reminders.send_due().await.unwrap();

        assert_eq!(report.interviews_sent, 1);
        assert_eq!(report.tasks_sent, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(mailer.sent().len(), 3);
        assert_eq!(store.marked.lock().unwrap().len(), 3);

        // Nothing left on the next pass
        let again = reminders.send_due().await.unwrap();
        assert_eq!(again.sent(), 0);
        assert_eq!(mailer.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_send_stays_due() {
        let bad = task("not an address");
        let bad_id = bad.id;
        let store = Arc::new(FakeStore {
            tasks: vec![bad, task("ada@example.com")],
            ..FakeStore::default()
        });
        let mailer = Arc::new(MemoryMailer::new());
        let reminders = Reminders::new(store.clone(), mailer.clone(), 10);

        let report = reminders.send_due().await.unwrap();
        assert_eq!(report.tasks_sent, 1);
        assert_eq!(report.failed, 1);
        assert!(!store.marked.lock().unwrap().contains(&bad_id));

        let retry = reminders.send_due().await.unwrap();
        assert_eq!(retry.sent(), 0);
        assert_eq!(retry.failed, 1);
    }

    #[tokio::test]
    async fn test_batch_size_limits_each_kind() {
        let store = Arc::new(FakeStore {
            interviews: (0..5).map(|_| interview("ada@example.com")).collect(),
            tasks: (0..5).map(|_| task("ada@example.com")).collect(),
            ..FakeStore::default()
        });
        let reminders = Reminders::new(store, Arc::new(MemoryMailer::new()), 2);

        let report = reminders.send_due().await.unwrap();
        assert_eq!(report.interviews_sent, 2);
        assert_eq!(report.tasks_sent, 2);
    }

    #[tokio::test]
    async fn test_store_error_aborts_pass() {
        let store = Arc::new(FakeStore {
            interviews: vec![interview("ada@example.com")],
            fail_marking: true,
            ..FakeStore::default()
        });
        let reminders = Reminders::new(store, Arc::new(MemoryMailer::new()), 10);

        assert!(matches!(reminders.send_due().await, Err(ReminderError::Database(_))));
    }
}
