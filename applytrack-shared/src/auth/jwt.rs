/// Short-lived signed tokens
///
/// Sessions are opaque database-backed tokens (see [`super::session_token`]).
/// JWTs are only used for short, single-purpose hand-offs that must not touch
/// the database until they are redeemed:
///
/// - **Two-factor challenge**: proves the password step of a login when the
///   account has TOTP enabled (5 minutes)
/// - **OAuth state**: CSRF state for the provider round trip (10 minutes)
///
/// Tokens are HS256-signed with issuer `applytrack` and carry a `purpose`
/// claim; a token minted for one purpose is rejected for the other.
///
/// # Example
///
/// ```
/// use applytrack_shared::auth::jwt::{create_token, validate_token, Claims, TokenPurpose};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "a-secret-that-is-at-least-32-bytes-long";
/// let user_id = Uuid::new_v4();
///
/// let claims = Claims::new(Some(user_id), TokenPurpose::TwoFactorChallenge);
/// let token = create_token(&claims, secret)?;
///
/// let validated = validate_token(&token, secret, TokenPurpose::TwoFactorChallenge)?;
/// assert_eq!(validated.sub, Some(user_id));
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ISSUER: &str = "applytrack";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Failed to validate token
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Token was minted for a different purpose
    #[error("Token purpose mismatch: expected {expected:?}, got {actual:?}")]
    WrongPurpose {
        expected: TokenPurpose,
        actual: TokenPurpose,
    },
}

/// What a token may be redeemed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Second step of a password login with TOTP enabled
    TwoFactorChallenge,

    /// OAuth `state` parameter
    #[serde(rename = "oauth_state")]
    OAuthState,
}

impl TokenPurpose {
    /// Lifetime of a freshly minted token
    pub fn lifetime(&self) -> Duration {
        match self {
            TokenPurpose::TwoFactorChallenge => Duration::minutes(5),
            TokenPurpose::OAuthState => Duration::minutes(10),
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user the token speaks for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,

    /// Issuer, always `applytrack`
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Unique token id, also serves as the OAuth nonce
    pub jti: Uuid,

    /// What the token is for
    pub purpose: TokenPurpose,

    /// OAuth provider name (OAuth state tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Claims {
    /// Creates claims with the purpose's default lifetime
    pub fn new(user_id: Option<Uuid>, purpose: TokenPurpose) -> Self {
        Self::with_expiration(user_id, purpose, purpose.lifetime())
    }

    /// Creates claims with a custom lifetime
    pub fn with_expiration(user_id: Option<Uuid>, purpose: TokenPurpose, expires_in: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4(),
            purpose,
            provider: None,
        }
    }

    /// Attaches the OAuth provider name
    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Checks if token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Signs claims with HS256
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Validates signature, expiry, issuer and purpose
pub fn validate_token(token: &str, secret: &str, expected: TokenPurpose) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    let claims = token_data.claims;
    if claims.purpose != expected {
        return Err(JwtError::WrongPurpose {
            expected,
            actual: claims.purpose,
        });
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    #[test]
    fn test_purpose_lifetimes() {
        assert_eq!(TokenPurpose::TwoFactorChallenge.lifetime(), Duration::minutes(5));
        assert_eq!(TokenPurpose::OAuthState.lifetime(), Duration::minutes(10));
    }

    #[test]
    fn test_create_and_validate_challenge() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(Some(user_id), TokenPurpose::TwoFactorChallenge);
        let token = create_token(&claims, SECRET).unwrap();

        let validated = validate_token(&token, SECRET, TokenPurpose::TwoFactorChallenge).unwrap();
        assert_eq!(validated.sub, Some(user_id));
        assert_eq!(validated.iss, "applytrack");
        assert_eq!(validated.jti, claims.jti);
    }

    #[test]
    fn test_oauth_state_carries_provider() {
        let claims = Claims::new(None, TokenPurpose::OAuthState).for_provider("github");
        let token = create_token(&claims, SECRET).unwrap();

        let validated = validate_token(&token, SECRET, TokenPurpose::OAuthState).unwrap();
        assert_eq!(validated.provider.as_deref(), Some("github"));
        assert!(validated.sub.is_none());
    }

    #[test]
    fn test_wrong_purpose_rejected() {
        let claims = Claims::new(None, TokenPurpose::OAuthState);
        let token = create_token(&claims, SECRET).unwrap();

        let result = validate_token(&token, SECRET, TokenPurpose::TwoFactorChallenge);
        assert!(matches!(result, Err(JwtError::WrongPurpose { .. })));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = Claims::new(Some(Uuid::new_v4()), TokenPurpose::TwoFactorChallenge);
        let token = create_token(&claims, SECRET).unwrap();

        let result = validate_token(&token, "another-secret-that-is-long-enough!!", TokenPurpose::TwoFactorChallenge);
        assert!(matches!(result, Err(JwtError::ValidationError(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = Claims::with_expiration(
            Some(Uuid::new_v4()),
            TokenPurpose::TwoFactorChallenge,
            Duration::seconds(-3600),
        );
        assert!(claims.is_expired());

        let token = create_token(&claims, SECRET).unwrap();
        let result = validate_token(&token, SECRET, TokenPurpose::TwoFactorChallenge);
        assert!(matches!(result, Err(JwtError::Expired)));
    }
}
