/// Middleware modules for the API server
///
/// - `auth`: bearer session authentication
/// - `rate_limit`: per-user token buckets
/// - `security`: security response headers

pub mod auth;
pub mod rate_limit;
pub mod security;
