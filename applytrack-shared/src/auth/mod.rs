/// Authentication primitives for ApplyTrack
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`session_token`]: opaque session and reset tokens (hashed at rest)
/// - [`jwt`]: short-lived signed tokens (2FA challenge, OAuth state)
/// - [`totp`]: RFC 6238 one-time codes
/// - [`throttle`]: in-memory login lockout
/// - [`user_agent`]: device / browser / OS labels for sessions
/// - [`middleware`]: bearer session resolution for Axum
///
/// # Security Features
///
/// - **Password Hashing**: Argon2id with 64 MB memory, 3 iterations
/// - **Sessions**: 48 random characters, only SHA-256 stored
/// - **Constant-time Comparison**: token, TOTP and signature checks
///
/// # Example
///
/// ```no_run
/// use applytrack_shared::auth::password::{hash_password, verify_password};
/// use applytrack_shared::auth::session_token::{generate, TokenKind};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Correct-Horse-9")?;
/// assert!(verify_password("Correct-Horse-9", &hash)?);
///
/// let (token, token_hash) = generate(TokenKind::Session);
/// # Ok(())
/// # }
/// ```

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod session_token;
pub mod throttle;
pub mod totp;
pub mod user_agent;
