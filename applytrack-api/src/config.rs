/// Configuration management for the API server
///
/// This module loads configuration from environment variables (and a `.env`
/// file in development) into a typed struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `API_HOST` / `API_PORT`: bind address (default 0.0.0.0:8080)
/// - `JWT_SECRET`: signing key for short-lived tokens, >= 32 chars (required)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default `*`)
/// - `PRODUCTION`: enables HSTS (default false)
/// - `TRUSTED_PROXY_HOPS`: reverse proxies in front of the API whose
///   `X-Forwarded-For` entries are trusted (default 0, header ignored)
/// - `APP_URL`: public URL of the web app, used in emails and redirects
/// - `SESSION_TTL_DAYS`: session lifetime (default 30)
/// - `REDIS_URL`: shared rate-limit store (optional)
/// - `SMTP_*`, `STRIPE_*`, `GOOGLE_*`, `GITHUB_*`: optional integrations
///
/// # Example
///
/// ```no_run
/// use applytrack_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use applytrack_shared::{
    billing::StripeConfig, db::pool::DatabaseConfig, mail::SmtpConfig,
    models::session::DEFAULT_TTL_DAYS, oauth::OAuthClientConfig,
};
use std::env;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,

    pub database: DatabaseConfig,

    pub jwt: JwtConfig,

    pub session: SessionConfig,

    /// Rate limits fall back to in-process buckets when unset
    pub redis_url: Option<String>,

    /// Emails are logged when unset
    pub smtp: Option<SmtpConfig>,

    /// Billing endpoints answer 503 when unset
    pub stripe: Option<StripeConfig>,

    pub google: Option<OAuthClientConfig>,

    pub github: Option<OAuthClientConfig>,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,

    pub port: u16,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,

    /// Production mode (HSTS)
    pub production: bool,

    /// Base URL of the web app, without trailing slash
    pub app_url: String,

    /// Proxies that append to `X-Forwarded-For`; 0 means the socket peer is
    /// the client
    pub trusted_proxy_hops: usize,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for signing challenge and OAuth state tokens
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_days: i64,
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or malformed, or
    /// if an optional integration is only partly configured.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let app_url = env::var("APP_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let trusted_proxy_hops = match env::var("TRUSTED_PROXY_HOPS") {
            Ok(v) => v.trim().parse::<usize>()?,
            Err(_) => 0,
        };

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let ttl_days = match env::var("SESSION_TTL_DAYS") {
            Ok(v) => v.parse::<i64>()?,
            Err(_) => DEFAULT_TTL_DAYS,
        };
        if ttl_days < 1 {
            anyhow::bail!("SESSION_TTL_DAYS must be at least 1");
        }

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            jwt: JwtConfig { secret: jwt_secret },
            session: SessionConfig { ttl_days },
            redis_url: non_empty("REDIS_URL"),
            smtp: SmtpConfig::from_env()?,
            stripe: StripeConfig::from_env(&app_url)?,
            google: OAuthClientConfig::from_env("GOOGLE"),
            github: OAuthClientConfig::from_env("GITHUB"),
            api: ApiConfig {
                host,
                port,
                cors_origins,
                production: env_flag("PRODUCTION"),
                app_url,
                trusted_proxy_hops,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Link to the password reset page for `token`
    pub fn reset_url(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.api.app_url, token)
    }

    /// Session lifetime as a chrono duration
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.session.ttl_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
                production: false,
                app_url: "https://app.applytrack.test".to_string(),
                trusted_proxy_hops: 0,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                ..DatabaseConfig::default()
            },
            jwt: JwtConfig {
                secret: "test-secret-key-at-least-32-bytes-long".to_string(),
            },
            session: SessionConfig { ttl_days: 30 },
            redis_url: None,
            smtp: None,
            stripe: None,
            google: None,
            github: None,
        }
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(config().bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reset_url() {
        assert_eq!(
            config().reset_url("atr_abc"),
            "https://app.applytrack.test/reset-password?token=atr_abc"
        );
    }

    #[test]
    fn test_session_ttl() {
        assert_eq!(config().session_ttl(), chrono::Duration::days(30));
    }
}
