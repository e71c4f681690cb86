/// Rate limiting middleware
///
/// Token bucket rate limiting per authenticated user, sized from the user's
/// plan. State lives in Redis when `REDIS_URL` is configured so every API
/// instance shares the same buckets; otherwise (or when Redis errors) an
/// in-process bucket map is used.
///
/// # Rate Limits by Plan
///
/// - **Free**: 60 requests/minute (1 request per second)
/// - **Pro**: 300 requests/minute (5 requests per second)
///
/// # Storage
///
/// Redis keys: `ratelimit:user:{user_id}` and `ratelimit:ip:{ip}:forgot`,
/// expiring after 2 minutes of inactivity.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per minute
/// - `X-RateLimit-Remaining`: tokens remaining
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use applytrack_shared::{auth::middleware::AuthContext, plan::Plan};
use axum::{
    extract::{Extension, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;

/// Limit applied to password reset requests per client IP
pub const FORGOT_PASSWORD_PER_MINUTE: u32 = 5;

const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])

if not tokens then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + (elapsed * refill_rate))

if tokens >= 1 then
    tokens = tokens - 1
    redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', tostring(now))
    redis.call('EXPIRE', key, 120)
    return {1, math.floor(tokens), 0}
else
    redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', tostring(now))
    redis.call('EXPIRE', key, 120)
    return {0, 0, math.ceil((1 - tokens) / refill_rate)}
end
"#;

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Maximum requests per minute
    pub requests_per_minute: u32,

    /// Token refill rate (tokens per second)
    pub refill_rate: f64,

    /// Maximum tokens in bucket (burst capacity)
    pub bucket_capacity: u32,
}

impl RateLimit {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        RateLimit {
            requests_per_minute,
            refill_rate: requests_per_minute as f64 / 60.0,
            bucket_capacity: requests_per_minute,
        }
    }

    /// Gets rate limit configuration for a plan
    pub fn for_plan(plan: Plan) -> Self {
        Self::per_minute(plan.limits().requests_per_minute)
    }
}

/// In-process token bucket
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,

    /// Last refill time, Unix seconds
    last_refill: f64,

    capacity: u32,
    rate: f64,
}

impl TokenBucket {
    fn new(limit: RateLimit, now: f64) -> Self {
        TokenBucket {
            tokens: limit.bucket_capacity as f64,
            last_refill: now,
            capacity: limit.bucket_capacity,
            rate: limit.refill_rate,
        }
    }

    /// Takes the current limit, which changes when the user switches plan
    fn set_limit(&mut self, limit: RateLimit) {
        self.capacity = limit.bucket_capacity;
        self.rate = limit.refill_rate;
    }

    /// Refills tokens based on elapsed time
    fn refill(&mut self, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    fn try_consume(&mut self, count: f64) -> bool {
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    /// Calculates seconds until N tokens are available
    fn seconds_until_available(&self, count: f64) -> u64 {
        let deficit = count - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / self.rate).ceil() as u64
        }
    }

    /// Whether the bucket would be full again at `now`
    fn is_idle(&self, now: f64) -> bool {
        self.tokens + (now - self.last_refill).max(0.0) * self.rate >= self.capacity as f64
    }
}

/// Result of rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether request is allowed
    pub ok: bool,

    /// Tokens remaining
    pub remaining: u32,

    /// Seconds until a token is available (0 when allowed)
    pub reset_after: u64,
}

/// Token bucket store shared by all requests
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    memory: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Process-local buckets only
    pub fn in_memory() -> Self {
        RateLimiter {
            redis: None,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Connects to Redis for shared buckets
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(RateLimiter {
            redis: Some(manager),
            memory: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_distributed(&self) -> bool {
        self.redis.is_some()
    }

    /// Takes one token from the bucket at `key`
    pub async fn check(&self, key: &str, limit: RateLimit) -> RateLimitResult {
        let now = now_secs();

        if let Some(manager) = &self.redis {
            match check_redis(manager.clone(), key, limit, now).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Redis rate limit check failed, using local buckets");
                }
            }
        }

        self.check_local(key, limit, now)
    }

    fn check_local(&self, key: &str, limit: RateLimit, now: f64) -> RateLimitResult {
        let mut buckets = match self.memory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(limit, now));
        bucket.set_limit(limit);
        bucket.refill(now);

        if bucket.try_consume(1.0) {
            RateLimitResult {
                ok: true,
                remaining: bucket.tokens.floor() as u32,
                reset_after: 0,
            }
        } else {
            RateLimitResult {
                ok: false,
                remaining: 0,
                reset_after: bucket.seconds_until_available(1.0).max(1),
            }
        }
    }

    /// Drops local buckets that have refilled completely
    pub fn prune(&self) -> usize {
        self.prune_at(now_secs())
    }

    fn prune_at(&self, now: f64) -> usize {
        let mut buckets = match self.memory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_idle(now));
        before - buckets.len()
    }
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

async fn check_redis(
    mut conn: ConnectionManager,
    key: &str,
    limit: RateLimit,
    now: f64,
) -> Result<RateLimitResult, redis::RedisError> {
    let result: Vec<i64> = redis::Script::new(BUCKET_SCRIPT)
        .key(key)
        .arg(limit.bucket_capacity)
        .arg(limit.refill_rate)
        .arg(now)
        .invoke_async(&mut conn)
        .await?;

    match result.as_slice() {
        [ok, remaining, reset_after] => Ok(RateLimitResult {
            ok: *ok == 1,
            remaining: (*remaining).max(0) as u32,
            reset_after: (*reset_after).max(if *ok == 1 { 0 } else { 1 }) as u64,
        }),
        _ => Err(redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "unexpected rate limit script reply",
        ))),
    }
}

/// Turns a rejected check into a 429
pub fn exceeded(result: RateLimitResult) -> ApiError {
    ApiError::RateLimitExceeded {
        retry_after: result.reset_after,
        message: format!(
            "Rate limit exceeded. Try again in {} seconds",
            result.reset_after
        ),
    }
}

/// Per-user rate limiting middleware layer
///
/// Runs after session authentication; the bucket size follows the plan in
/// the caller's [`AuthContext`].
///
/// # Errors
///
/// - 429 Too Many Requests: Rate limit exceeded
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = RateLimit::for_plan(auth.plan);
    let key = format!("ratelimit:user:{}", auth.user_id);

    let result = state.rate_limiter.check(&key, limit).await;
    if !result.ok {
        tracing::debug!(user_id = %auth.user_id, retry_after = result.reset_after, "Rate limit exceeded");
        return Err(exceeded(result));
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit.requests_per_minute));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_for_free() {
        let limit = RateLimit::for_plan(Plan::Free);
        assert_eq!(limit.requests_per_minute, 60);
        assert_eq!(limit.bucket_capacity, 60);
        assert_eq!(limit.refill_rate, 1.0);
    }

    #[test]
    fn test_rate_limit_for_pro() {
        let limit = RateLimit::for_plan(Plan::Pro);
        assert_eq!(limit.requests_per_minute, 300);
        assert_eq!(limit.bucket_capacity, 300);
        assert_eq!(limit.refill_rate, 5.0);
    }

    #[test]
    fn test_token_bucket_consume() {
        let mut bucket = TokenBucket::new(RateLimit::per_minute(10), 0.0);
        assert!(bucket.try_consume(1.0));
        assert_eq!(bucket.tokens, 9.0);
        assert!(bucket.try_consume(5.0));
        assert_eq!(bucket.tokens, 4.0);
        assert!(!bucket.try_consume(10.0));
        assert_eq!(bucket.tokens, 4.0); // Unchanged after failed attempt
    }

    #[test]
    fn test_token_bucket_refill_capped() {
        let mut bucket = TokenBucket::new(RateLimit::per_minute(60), 1000.0);
        bucket.tokens = 5.0;

        bucket.refill(1010.0);
        assert!((bucket.tokens - 15.0).abs() < 1e-9);

        bucket.refill(2000.0);
        assert_eq!(bucket.tokens, 60.0);
    }

    #[test]
    fn test_token_bucket_seconds_until_available() {
        let mut bucket = TokenBucket::new(RateLimit::per_minute(60), 0.0);
        bucket.tokens = 2.0;

        // Need 5 tokens, have 2, rate is 1/sec -> need 3 seconds
        assert_eq!(bucket.seconds_until_available(5.0), 3);
        assert_eq!(bucket.seconds_until_available(1.0), 0);
    }

    #[test]
    fn test_local_bucket_exhausts_and_refills() {
        let limiter = RateLimiter::in_memory();
        let limit = RateLimit::per_minute(3);

        for expected in [2, 1, 0] {
            let result = limiter.check_local("user:a", limit, 100.0);
            assert!(result.ok);
            assert_eq!(result.remaining, expected);
        }

        let blocked = limiter.check_local("user:a", limit, 100.0);
        assert!(!blocked.ok);
        assert_eq!(blocked.reset_after, 20);

        // other keys are independent
        assert!(limiter.check_local("user:b", limit, 100.0).ok);

        // 3/min refills one token every 20 seconds
        assert!(limiter.check_local("user:a", limit, 121.0).ok);
    }

    #[test]
    fn test_local_bucket_follows_plan_change() {
        let limiter = RateLimiter::in_memory();
        let free = RateLimit::for_plan(Plan::Free);
        let pro = RateLimit::for_plan(Plan::Pro);

        for _ in 0..free.bucket_capacity {
            assert!(limiter.check_local("user:upgraded", free, 0.0).ok);
        }
        assert!(!limiter.check_local("user:upgraded", free, 0.0).ok);

        // one second at the PRO rate refills five tokens, not one
        for _ in 0..5 {
            assert!(limiter.check_local("user:upgraded", pro, 1.0).ok);
        }
        assert!(!limiter.check_local("user:upgraded", pro, 1.0).ok);

        // and the bucket may now fill past the FREE capacity
        let result = limiter.check_local("user:upgraded", pro, 1000.0);
        assert_eq!(result.remaining, pro.bucket_capacity - 1);
    }

    #[test]
    fn test_prune_drops_full_buckets() {
        let limiter = RateLimiter::in_memory();
        let limit = RateLimit::per_minute(60);

        limiter.check_local("idle", limit, 0.0);
        limiter.check_local("busy", limit, 59.5);

        assert_eq!(limiter.prune_at(60.0), 1);
        assert_eq!(limiter.memory.lock().unwrap().len(), 1);
        assert!(!limiter.is_distributed());
    }

    #[tokio::test]
    async fn test_check_without_redis_uses_local_buckets() {
        let limiter = RateLimiter::in_memory();
        let limit = RateLimit::per_minute(1);

        assert!(limiter.check("ratelimit:ip:1.2.3.4:forgot", limit).await.ok);
        let second = limiter.check("ratelimit:ip:1.2.3.4:forgot", limit).await;
        assert!(!second.ok);
        assert!(second.reset_after >= 1);

        assert!(matches!(exceeded(second), ApiError::RateLimitExceeded { .. }));
    }
}
