/// In-memory login throttling
///
/// Failed logins are counted per `(client IP, normalized email)` inside a
/// sliding window. Once the failure count reaches the threshold the key is
/// locked out for `base * 2^(failures - threshold)`, capped at `max_lockout`.
/// A successful login clears the key.
///
/// State is process-local and lost on restart. Time is passed in by the
/// caller so the policy can be tested without sleeping.
///
/// # Example
///
/// ```
/// use applytrack_shared::auth::throttle::{LoginThrottle, ThrottleConfig, ThrottleKey};
/// use std::time::Instant;
///
/// let throttle = LoginThrottle::new(ThrottleConfig::default());
/// let key = ThrottleKey::new("203.0.113.9", "Jane@Example.com ");
/// let now = Instant::now();
///
/// for _ in 0..5 {
///     throttle.record_failure(&key, now);
/// }
/// assert!(throttle.check(&key, now).is_err());
///
/// throttle.record_success(&key);
/// assert!(throttle.check(&key, now).is_ok());
/// ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Throttle policy
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Failures allowed before a lockout starts
    pub max_failures: u32,

    /// Failures older than this no longer count
    pub window: Duration,

    /// Lockout length at the threshold, doubled per extra failure
    pub base_lockout: Duration,

    /// Upper bound for a single lockout
    pub max_lockout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(15 * 60),
            base_lockout: Duration::from_secs(30),
            max_lockout: Duration::from_secs(15 * 60),
        }
    }
}

impl ThrottleConfig {
    /// Lockout length after `failures` consecutive failures
    ///
    /// Zero below the threshold.
    pub fn lockout_for(&self, failures: u32) -> Duration {
        if failures < self.max_failures {
            return Duration::ZERO;
        }

        let exponent = (failures - self.max_failures).min(20);
        self.base_lockout
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_lockout)
            .min(self.max_lockout)
    }
}

/// Throttle key: client IP plus normalized email
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    ip: String,
    email: String,
}

impl ThrottleKey {
    pub fn new(ip: impl Into<String>, email: &str) -> Self {
        Self {
            ip: ip.into(),
            email: normalize_email(email),
        }
    }
}

/// Trims and lowercases an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Returned by [`LoginThrottle::check`] while a key is locked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Too many failed login attempts, retry in {} seconds", .retry_after.as_secs().max(1))]
pub struct Locked {
    /// Time until the lockout ends
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Thread-safe login throttle
#[derive(Debug, Default)]
pub struct LoginThrottle {
    config: ThrottleConfig,
    entries: Mutex<HashMap<ThrottleKey, AttemptRecord>>,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ThrottleKey, AttemptRecord>> {
        // a panic while holding the lock leaves only counters behind
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fails while the key is locked out
    pub fn check(&self, key: &ThrottleKey, now: Instant) -> Result<(), Locked> {
        let entries = self.entries();

        match entries.get(key).and_then(|record| record.locked_until) {
            Some(until) if until > now => Err(Locked {
                retry_after: until - now,
            }),
            _ => Ok(()),
        }
    }

    /// Records a failed attempt
    ///
    /// Returns the lockout duration when this failure starts (or extends) a
    /// lockout.
    pub fn record_failure(&self, key: &ThrottleKey, now: Instant) -> Option<Duration> {
        let mut entries = self.entries();

        let record = entries.entry(key.clone()).or_insert(AttemptRecord {
            failures: 0,
            window_start: now,
            locked_until: None,
        });

        let locked = record.locked_until.map_or(false, |until| until > now);
        if !locked && now.saturating_duration_since(record.window_start) > self.config.window {
            record.failures = 0;
            record.window_start = now;
        }

        record.failures = record.failures.saturating_add(1);

        let lockout = self.config.lockout_for(record.failures);
        if lockout.is_zero() {
            None
        } else {
            record.locked_until = Some(now + lockout);
            Some(lockout)
        }
    }

    /// Clears the key after a successful login
    pub fn record_success(&self, key: &ThrottleKey) {
        self.entries().remove(key);
    }

    /// Drops entries whose window and lockout have both elapsed
    ///
    /// Returns the number of removed entries.
    pub fn prune(&self, now: Instant) -> usize {
        let window = self.config.window;
        let mut entries = self.entries();
        let before = entries.len();

        entries.retain(|_, record| {
            let window_open = now.saturating_duration_since(record.window_start) <= window;
            let locked = record.locked_until.map_or(false, |until| until > now);
            window_open || locked
        });

        before - entries.len()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
