/// TOTP two-factor authentication (RFC 6238)
///
/// SHA-1, 6 digits, 30 second step. Verification accepts the previous,
/// current and next step to absorb clock drift between server and phone.
/// Secrets are 20 random bytes encoded as unpadded base32, the format
/// authenticator apps expect.

use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

/// Time step in seconds
pub const STEP_SECONDS: u64 = 30;

/// Number of digits in a code
pub const DIGITS: u32 = 6;

/// Steps accepted on either side of the current one
const SKEW_STEPS: u64 = 1;

const ISSUER: &str = "ApplyTrack";

/// Error type for TOTP operations
#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    /// Stored secret is not valid base32
    #[error("Invalid TOTP secret")]
    InvalidSecret,

    /// Submitted code is not six ASCII digits
    #[error("Code must be {DIGITS} digits")]
    MalformedCode,
}

/// Generates a new base32 secret
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Builds the `otpauth://` provisioning URL shown as a QR code
pub fn provisioning_url(secret: &str, account_email: &str) -> String {
    let label = format!("{}:{}", ISSUER, account_email);
    format!(
        "otpauth://totp/{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        percent_encode(&label),
        secret,
        ISSUER,
        DIGITS,
        STEP_SECONDS
    )
}

/// Code for a Unix timestamp
pub fn code_at(secret: &str, unix_seconds: u64) -> Result<String, TotpError> {
    let key = decode_secret(secret)?;
    Ok(totp_lite::totp_custom::<totp_lite::Sha1>(
        STEP_SECONDS,
        DIGITS,
        &key,
        unix_seconds,
    ))
}

/// Verifies a submitted code at the given Unix timestamp
///
/// Whitespace inside the code is ignored ("123 456" is accepted).
pub fn verify_code(secret: &str, code: &str, unix_seconds: u64) -> Result<bool, TotpError> {
    let submitted: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    if submitted.len() != DIGITS as usize || !submitted.chars().all(|c| c.is_ascii_digit()) {
        return Err(TotpError::MalformedCode);
    }

    let key = decode_secret(secret)?;
    let mut matched = false;

    let first = unix_seconds.saturating_sub(SKEW_STEPS * STEP_SECONDS);
    let last = unix_seconds + SKEW_STEPS * STEP_SECONDS;
    let mut t = first;
    while t <= last {
        let expected = totp_lite::totp_custom::<totp_lite::Sha1>(STEP_SECONDS, DIGITS, &key, t);
        // no early exit, every window is compared
        matched |= bool::from(expected.as_bytes().ct_eq(submitted.as_bytes()));
        t += STEP_SECONDS;
    }

    Ok(matched)
}

/// Verifies against the current system time
pub fn verify_code_now(secret: &str, code: &str) -> Result<bool, TotpError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    verify_code(secret, code, now)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| TotpError::InvalidSecret)
}

fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' | b':' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 6238 appendix B seed "12345678901234567890" in base32
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc6238_vectors() {
        // 8-digit vectors truncated to 6 digits
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1111111109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SECRET, 1234567890).unwrap(), "005924");
    }

    #[test]
    fn test_verify_accepts_adjacent_steps() {
        let now = 1_700_000_000;
        let previous = code_at(RFC_SECRET, now - STEP_SECONDS).unwrap();
        let next = code_at(RFC_SECRET, now + STEP_SECONDS).unwrap();

        assert!(verify_code(RFC_SECRET, &previous, now).unwrap());
        assert!(verify_code(RFC_SECRET, &next, now).unwrap());
    }

    #[test]
    fn test_verify_rejects_distant_steps() {
        let now = 1_700_000_000;
        let stale = code_at(RFC_SECRET, now - 5 * STEP_SECONDS).unwrap();
        let current = code_at(RFC_SECRET, now).unwrap();

        if stale != current {
            assert!(!verify_code(RFC_SECRET, &stale, now).unwrap());
        }
    }

    #[test]
    fn test_verify_ignores_whitespace() {
        let now = 1_700_000_000;
        let code = code_at(RFC_SECRET, now).unwrap();
        let spaced = format!("{} {}", &code[..3], &code[3..]);
        assert!(verify_code(RFC_SECRET, &spaced, now).unwrap());
    }

    #[test]
    fn test_malformed_codes() {
        assert!(matches!(verify_code(RFC_SECRET, "12345", 0), Err(TotpError::MalformedCode)));
        assert!(matches!(verify_code(RFC_SECRET, "12345a", 0), Err(TotpError::MalformedCode)));
        assert!(matches!(verify_code(RFC_SECRET, "", 0), Err(TotpError::MalformedCode)));
    }

    #[test]
    fn test_invalid_secret() {
        assert!(matches!(verify_code("not base32 !!", "123456", 0), Err(TotpError::InvalidSecret)));
    }

    #[test]
    fn test_generate_secret_decodes_to_20_bytes() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(decode_secret(&secret).unwrap().len(), 20);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_provisioning_url() {
        let url = provisioning_url("JBSWY3DPEHPK3PXP", "jane+jobs@example.com");
        assert!(url.starts_with("otpauth://totp/ApplyTrack:jane%2Bjobs@example.com?"));
        assert!(url.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(url.contains("issuer=ApplyTrack"));
    }
}
