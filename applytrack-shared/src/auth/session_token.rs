/// Opaque secret tokens (sessions and password resets)
///
/// Tokens are a short kind prefix followed by 48 random base62 characters.
/// Only the SHA-256 hex digest is persisted; the plaintext is handed to the
/// client once.
///
/// | Kind | Format |
/// |---|---|
/// | Session | `ats_` + 48 chars |
/// | Password reset | `atr_` + 48 chars |
///
/// # Example
///
/// ```
/// use applytrack_shared::auth::session_token::{generate, hash_token, is_well_formed, TokenKind};
///
/// let (token, hash) = generate(TokenKind::Session);
/// assert!(token.starts_with("ats_"));
/// assert!(is_well_formed(&token, TokenKind::Session));
/// assert_eq!(hash, hash_token(&token));
/// ```

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of the random part of a token
const RANDOM_LENGTH: usize = 48;

/// Kind of secret token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bearer credential for an authenticated session
    Session,

    /// One-time password reset link token
    PasswordReset,
}

impl TokenKind {
    fn prefix(&self) -> &'static str {
        match self {
            TokenKind::Session => "ats_",
            TokenKind::PasswordReset => "atr_",
        }
    }

    /// Total token length including the prefix
    pub fn token_len(&self) -> usize {
        self.prefix().len() + RANDOM_LENGTH
    }
}

/// Generates a token and its storage hash
///
/// Returns `(plaintext, sha256_hex)`.
pub fn generate(kind: TokenKind) -> (String, String) {
    let random: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(RANDOM_LENGTH)
        .map(char::from)
        .collect();

    let token = format!("{}{}", kind.prefix(), random);
    let hash = hash_token(&token);
    (token, hash)
}

/// SHA-256 hex digest of a token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cheap shape check before touching the database
pub fn is_well_formed(token: &str, kind: TokenKind) -> bool {
    token.len() == kind.token_len()
        && token
            .strip_prefix(kind.prefix())
            .map(|rest| rest.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(false)
}

/// Constant-time comparison of a token against a stored hash
pub fn verify(token: &str, stored_hash: &str) -> bool {
    let computed = hash_token(token);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_session_token() {
        let (token, hash) = generate(TokenKind::Session);

        assert!(token.starts_with("ats_"));
        assert_eq!(token.len(), 52);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_reset_token() {
        let (token, _) = generate(TokenKind::PasswordReset);
        assert!(token.starts_with("atr_"));
        assert!(is_well_formed(&token, TokenKind::PasswordReset));
        assert!(!is_well_formed(&token, TokenKind::Session));
    }

    #[test]
    fn test_tokens_are_unique() {
        let (a, ha) = generate(TokenKind::Session);
        let (b, hb) = generate(TokenKind::Session);
        assert_ne!(a, b);
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_token("ats_abc"), hash_token("ats_abc"));
        assert_ne!(hash_token("ats_abc"), hash_token("ats_abd"));
    }

    #[test]
    fn test_is_well_formed_rejects_bad_shapes() {
        assert!(!is_well_formed("ats_short", TokenKind::Session));
        assert!(!is_well_formed(&format!("xyz_{}", "a".repeat(48)), TokenKind::Session));
        assert!(!is_well_formed(&format!("ats_{}!", "a".repeat(47)), TokenKind::Session));
        assert!(is_well_formed(&format!("ats_{}", "a".repeat(48)), TokenKind::Session));
    }

    #[test]
    fn test_verify() {
        let (token, hash) = generate(TokenKind::Session);
        assert!(verify(&token, &hash));
        assert!(!verify("ats_other", &hash));
    }
}
