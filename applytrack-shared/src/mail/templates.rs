/// Message bodies for the emails the service sends

use chrono::{DateTime, Utc};

use super::Email;
use crate::models::interview::InterviewReminder;
use crate::models::password_reset::RESET_TOKEN_TTL_MINUTES;
use crate::models::task::TaskReminder;

fn greeting(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hi {},", name),
        None => "Hi,".to_string(),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%A, %B %-d %Y at %H:%M UTC").to_string()
}

pub fn password_reset(to: &str, name: Option<&str>, reset_url: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your ApplyTrack password".to_string(),
        body: format!(
            "{}\n\n\
             Someone asked to reset the password for your ApplyTrack account.\n\
             Use the link below within {} minutes to choose a new one:\n\n\
             {}\n\n\
             If this wasn't you, you can ignore this email.\n",
            greeting(name),
            RESET_TOKEN_TTL_MINUTES,
            reset_url
        ),
    }
}

pub fn interview_reminder(reminder: &InterviewReminder) -> Email {
    let mut body = format!(
        "{}\n\n\
         Your {} interview for {} at {} is coming up on {}.\n",
        greeting(reminder.name.as_deref()),
        reminder.kind.label().to_lowercase(),
        reminder.position,
        reminder.company,
        format_time(reminder.scheduled_at),
    );

    if let Some(location) = reminder.location.as_deref().filter(|l| !l.is_empty()) {
        body.push_str(&format!("Location: {}\n", location));
    }
    body.push_str("\nGood luck!\n");

    Email {
        to: reminder.email.clone(),
        subject: format!("Reminder: {} interview with {}", reminder.kind.label(), reminder.company),
        body,
    }
}

pub fn task_reminder(reminder: &TaskReminder) -> Email {
    let context = reminder
        .company
        .as_deref()
        .map(|company| format!(" ({})", company))
        .unwrap_or_default();

    Email {
        to: reminder.email.clone(),
        subject: format!("Task due: {}", reminder.title),
        body: format!(
            "{}\n\n\
             \"{}\"{} is due on {}.\n",
            greeting(reminder.name.as_deref()),
            reminder.title,
            context,
            format_time(reminder.due_at),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interview::InterviewKind;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_password_reset() {
        let email = password_reset("ada@example.com", Some("Ada"), "https://app.test/reset?token=atr_x");

        assert_eq!(email.to, "ada@example.com");
        assert!(email.body.starts_with("Hi Ada,"));
        assert!(email.body.contains("https://app.test/reset?token=atr_x"));
        assert!(email.body.contains("60 minutes"));
    }

    #[test]
    fn test_greeting_without_name() {
        assert_eq!(greeting(None), "Hi,");
        assert_eq!(greeting(Some("  ")), "Hi,");
    }

    #[test]
    fn test_interview_reminder() {
        let reminder = InterviewReminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: None,
            company: "Acme".to_string(),
            position: "Engineer".to_string(),
            kind: InterviewKind::Onsite,
            scheduled_at: Utc.with_ymd_and_hms(2024, 5, 6, 14, 30, 0).unwrap(),
            location: Some("HQ".to_string()),
        };

        let email = interview_reminder(&reminder);
        assert_eq!(email.subject, "Reminder: On-site interview with Acme");
        assert!(email.body.contains("Monday, May 6 2024 at 14:30 UTC"));
        assert!(email.body.contains("Location: HQ"));
    }

    #[test]
    fn test_task_reminder() {
        let reminder = TaskReminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: Some("Ada".to_string()),
            title: "Send thank-you note".to_string(),
            due_at: Utc.with_ymd_and_hms(2024, 5, 7, 9, 0, 0).unwrap(),
            company: Some("Acme".to_string()),
        };

        let email = task_reminder(&reminder);
        assert_eq!(email.subject, "Task due: Send thank-you note");
        assert!(email.body.contains("\"Send thank-you note\" (Acme) is due on Tuesday, May 7 2024"));
    }
}
