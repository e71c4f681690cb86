/// OAuth 2.0 sign-in with Google and GitHub
///
/// Authorization-code flow: the API redirects to [`OAuthClient::authorize_url`]
/// with a signed `state`, and the callback calls [`OAuthClient::authenticate`]
/// to trade the code for the provider profile.

use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const REQUEST_TIMEOUT_SECONDS: u64 = 15;
const USER_AGENT: &str = concat!("applytrack/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Unknown OAuth provider '{0}'")]
    UnknownProvider(String),

    #[error("OAuth provider {0} is not configured")]
    NotConfigured(Provider),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch profile: {0}")]
    Profile(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }

    fn authorize_endpoint(&self) -> &'static str {
        match self {
            Provider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Provider::GitHub => "https://github.com/login/oauth/authorize",
        }
    }

    fn token_endpoint(&self) -> &'static str {
        match self {
            Provider::Google => "https://oauth2.googleapis.com/token",
            Provider::GitHub => "https://github.com/login/oauth/access_token",
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Provider::Google => "openid email profile",
            Provider::GitHub => "read:user user:email",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::GitHub),
            _ => Err(OAuthError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl OAuthClientConfig {
    /// Reads `{PREFIX}_CLIENT_ID`, `{PREFIX}_CLIENT_SECRET` and
    /// `{PREFIX}_REDIRECT_URL`; `None` unless all are set
    pub fn from_env(prefix: &str) -> Option<Self> {
        let var = |name: &str| {
            std::env::var(format!("{}_{}", prefix, name))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };

        Some(Self {
            client_id: var("CLIENT_ID")?,
            client_secret: var("CLIENT_SECRET")?,
            redirect_url: var("REDIRECT_URL")?,
        })
    }
}

/// Identity returned by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider: Provider,
    pub provider_account_id: String,
    /// Only set when the provider vouches for the address
    pub verified_email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Primary verified address, else any verified one
pub fn pick_github_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

fn google_profile(info: GoogleUserInfo) -> OAuthProfile {
    OAuthProfile {
        provider: Provider::Google,
        provider_account_id: info.sub,
        verified_email: info.email.filter(|_| info.email_verified),
        name: info.name,
        avatar_url: info.picture,
    }
}

pub struct OAuthClient {
    provider: Provider,
    config: OAuthClientConfig,
    http: Client,
}

impl OAuthClient {
    pub fn new(provider: Provider, config: OAuthClientConfig) -> Result<Self, OAuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { provider, config, http })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Provider consent page carrying `state`
    pub fn authorize_url(&self, state: &str) -> String {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", self.provider.scope()),
            ("state", state),
        ];
        if self.provider == Provider::Google {
            params.push(("prompt", "select_account"));
        }

        match Url::parse_with_params(self.provider.authorize_endpoint(), &params) {
            Ok(url) => url.into(),
            Err(_)=> self.provider.authorize_endpoint().to_string(),
        }
    }

    /// Trades an authorization code for an access token
    pub async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(self.provider.token_endpoint())
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        // GitHub reports errors with 200 OK
        match body.access_token {
            Some(token) if status.is_success() => Ok(token),
            _ => Err(OAuthError::TokenExchange(
                body.error_description
                    .or(body.error)
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            )),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T, OAuthError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OAuthError::Profile(format!("{} returned {}", url, response.status())));
        }

        response.json().await.map_err(|e| OAuthError::Profile(e.to_string()))
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<OAuthProfile, OAuthError> {
        match self.provider {
            Provider::Google => {
                let info: GoogleUserInfo = self
                    .get_json("https://openidconnect.googleapis.com/v1/userinfo", access_token)
                    .await?;
                Ok(google_profile(info))
            }
            Provider::GitHub => {
                let user: GitHubUser = self.get_json("https://api.github.com/user", access_token).await?;
                let emails: Vec<GitHubEmail> = self
                    .get_json("https://api.github.com/user/emails", access_token)
                    .await?;

                Ok(OAuthProfile {
                    provider: Provider::GitHub,
                    provider_account_id: user.id.to_string(),
                    verified_email: pick_github_email(&emails),
                    name: user.name.or(Some(user.login)),
                    avatar_url: user.avatar_url,
                })
            }
        }
    }

    /// Code to profile in one step
    pub async fn authenticate(&self, code: &str) -> Result<OAuthProfile, OAuthError> {
        let token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&token).await?;

        tracing::debug!(
            provider = %self.provider,
            account = %profile.provider_account_id,
            "OAuth profile fetched"
        );
        Ok(profile)
    }
}

/// Configured providers
#[derive(Default)]
pub struct OAuthProviders {
    google: Option<OAuthClient>,
    github: Option<OAuthClient>,
}

impl OAuthProviders {
    pub fn new(
        google: Option<OAuthClientConfig>,
        github: Option<OAuthClientConfig>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            google: google.map(|c| OAuthClient::new(Provider::Google, c)).transpose()?,
            github: github.map(|c| OAuthClient::new(Provider::GitHub, c)).transpose()?,
        })
    }

    pub fn get(&self, provider: Provider) -> Result<&OAuthClient, OAuthError> {
        let client = match provider {
            Provider::Google => self.google.as_ref(),
            Provider::GitHub => self.github.as_ref(),
        };
        client.ok_or(OAuthError::NotConfigured(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://api.test/v1/auth/oauth/github/callback".to_string(),
        }
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!("GitHub".parse::<Provider>().unwrap(), Provider::GitHub);
        assert!(matches!("gitlab".parse::<Provider>(), Err(OAuthError::UnknownProvider(_))));
    }

    #[test]
    fn test_authorize_url() {
        let client = OAuthClient::new(Provider::GitHub, config()).unwrap();
        let url = Url::parse(&client.authorize_url("state-token")).unwrap();

        assert_eq!(url.host_str(), Some("github.com"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_string(), "client-123".to_string())));
        assert!(pairs.contains(&("state".to_string(), "state-token".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "read:user user:email".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "https://api.test/v1/auth/oauth/github/callback".to_string()
        )));
    }

    #[test]
    fn test_pick_github_email() {
        let emails = vec![
            GitHubEmail { email: "old@example.com".to_string(), primary: false, verified: true },
            GitHubEmail { email: "main@example.com".to_string(), primary: true, verified: true },
        ];
        assert_eq!(pick_github_email(&emails).as_deref(), Some("main@example.com"));

        let emails = vec![
            GitHubEmail { email: "main@example.com".to_string(), primary: true, verified: false },
            GitHubEmail { email: "alt@example.com".to_string(), primary: false, verified: true },
        ];
        assert_eq!(pick_github_email(&emails).as_deref(), Some("alt@example.com"));

        let emails = vec![GitHubEmail { email: "x@example.com".to_string(), primary: true, verified: false }];
        assert_eq!(pick_github_email(&emails), None);
    }

    #[test]
    fn test_google_profile_requires_verified_email() {
        let info = GoogleUserInfo {
            sub: "1234".to_string(),
            email: Some("ada@example.com".to_string()),
            email_verified: false,
            name: Some("Ada".to_string()),
            picture: None,
        };
        let profile = google_profile(info);
        assert_eq!(profile.provider_account_id, "1234");
        assert_eq!(profile.verified_email, None);
    }

    #[test]
    fn test_providers_not_configured() {
        let providers = OAuthProviders::new(None, Some(config())).unwrap();
        assert!(providers.get(Provider::GitHub).is_ok());
        assert!(matches!(
            providers.get(Provider::Google),
            Err(OAuthError::NotConfigured(Provider::Google))
        ));
    }
}
