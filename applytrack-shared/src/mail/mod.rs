/// Outbound email
///
/// [`Mailer`] is the seam the API and worker send through. [`SmtpMailer`]
/// delivers over an SMTP relay with lettre; [`LogMailer`] writes messages to
/// the log when no relay is configured; [`MemoryMailer`] keeps them for
/// assertions in tests.
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::mail::{templates, LogMailer, Mailer};
///
/// # async fn example() -> Result<(), applytrack_shared::mail::MailError> {
/// let mailer = LogMailer::new("ApplyTrack <no-reply@applytrack.dev>");
/// mailer
///     .send(templates::password_reset("ada@example.com", None, "https://app/reset?token=atr_x"))
///     .await?;
/// # Ok(())
/// # }
/// ```

pub mod templates;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Mutex;
use std::time::Duration;

/// Seconds before an SMTP command is abandoned
const SMTP_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Plain-text message ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Upgrade with STARTTLS (production relays)
    StartTls,
    /// Plain connection, for local catch-all servers
    None,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `From` header, e.g. `ApplyTrack <no-reply@applytrack.dev>`
    pub from: String,
    pub security: SmtpSecurity,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            from: from.into(),
            security: SmtpSecurity::StartTls,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_security(mut self, security: SmtpSecurity) -> Self {
        self.security = security;
        self
    }

    /// Reads `SMTP_*` variables; `None` when `SMTP_HOST` is unset
    ///
    /// - `SMTP_PORT` (default 587)
    /// - `SMTP_USERNAME`, `SMTP_PASSWORD`
    /// - `SMTP_FROM` (default `ApplyTrack <no-reply@applytrack.dev>`)
    /// - `SMTP_STARTTLS` (default true)
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let host = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => host,
            _ => return Ok(None),
        };

        let port = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("SMTP_PORT must be a valid port number"))?;

        let from = std::env::var("SMTP_FROM").unwrap_or_else(|_| default_from().to_string());

        let starttls = std::env::var("SMTP_STARTTLS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let mut config = SmtpConfig::new(host, port, from).with_security(if starttls {
            SmtpSecurity::StartTls
        } else {
            SmtpSecurity::None
        });

        if let (Ok(user), Ok(pass)) = (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            config = config.with_credentials(user, pass);
        }

        Ok(Some(config))
    }
}

/// Sender used by [`LogMailer`] and when `SMTP_FROM` is unset
pub fn default_from() -> &'static str {
    "ApplyTrack <no-reply@applytrack.dev>"
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse::<Mailbox>()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

/// Builds the lettre message for an [`Email`]
pub fn build_message(from: &str, email: &Email) -> Result<Message, MailError> {
    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&email.to)?)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

/// SMTP delivery through lettre's async transport
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        // validate the sender once up front
        parse_mailbox(&config.from)?;

        let mut builder = match config.security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECONDS)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = build_message(&self.from, &email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::debug!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Logs messages instead of sending them
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new(default_from())
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        // same validation as a real send so bad addresses surface in dev
        build_message(&self.from, &email)?;

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "SMTP not configured, email logged"
        );
        Ok(())
    }
}

/// Collects messages in memory
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        parse_mailbox(&email.to)?;

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        }
    }

    #[test]
    fn test_build_message() {
        let message = build_message(default_from(), &email("ada@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: ada@example.com"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("no-reply@applytrack.dev"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let result = build_message(default_from(), &email("not an address"));
        assert!(matches!(result, Err(MailError::InvalidAddress(_))));

        let result = build_message("broken", &email("ada@example.com"));
        assert!(matches!(result, Err(MailError::InvalidAddress(_))));
    }

    #[test]
    fn test_smtp_mailer_new() {
        let config = SmtpConfig::new("localhost", 1025, default_from()).with_security(SmtpSecurity::None);
        assert!(SmtpMailer::new(&config).is_ok());

        let config = SmtpConfig::new("localhost", 1025, "nope");
        assert!(matches!(SmtpMailer::new(&config), Err(MailError::InvalidAddress(_))));
    }

    #[test]
    fn test_smtp_config_builder() {
        let config = SmtpConfig::new("smtp.example.com", 587, default_from())
            .with_credentials("user", "secret");

        assert_eq!(config.security, SmtpSecurity::StartTls);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_log_mailer() {
        let mailer = LogMailer::default();
        assert!(mailer.send(email("ada@example.com")).await.is_ok());
        assert!(mailer.send(email("bad")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_mailer_records() {
        let mailer = MemoryMailer::new();
        mailer.send(email("ada@example.com")).await.unwrap();
        mailer.send(email("bob@example.com")).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].to, "bob@example.com");
    }
}
