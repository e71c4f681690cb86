/// Request extractors
///
/// - [`ValidatedJson`]: JSON body run through `validator`, malformed bodies
///   answer 400 and schema failures 422 in the error envelope
/// - [`ApiQuery`], [`ApiPath`]: query string and path parameters with the
///   same 400 mapping
/// - [`Client`]: caller IP and user agent for sessions, audit and throttling

use applytrack_shared::models::session::ClientMeta;
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ConnectInfo, FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::{header, request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};
use validator::Validate;

use crate::{app::AppState, error::ApiError};

const MAX_USER_AGENT_LEN: usize = 512;

/// JSON body that has passed its `Validate` rules
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::BadRequest(rejection.body_text()))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Query string parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: QueryRejection| ApiError::BadRequest(rejection.body_text()))?;

        Ok(ApiQuery(value))
    }
}

/// Path parameters, e.g. resource ids
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: PathRejection| ApiError::BadRequest(rejection.body_text()))?;

        Ok(ApiPath(value))
    }
}

/// Caller network metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Client {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Client {
    /// Resolves the caller IP from the socket peer and, behind
    /// `trusted_hops` reverse proxies, from the `X-Forwarded-For` entry the
    /// outermost trusted proxy appended
    ///
    /// Entries left of that one are client-controlled and never read. A
    /// value that isn't an IP address falls back to the peer.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> Self {
        let forwarded = if trusted_hops == 0 {
            None
        } else {
            forwarded_hop(headers, trusted_hops)
        };

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect::<String>())
            .filter(|ua| !ua.is_empty());

        Self {
            ip: forwarded.or_else(|| peer.map(|addr| addr.ip())).map(|ip| ip.to_string()),
            user_agent,
        }
    }

    /// IP used as a throttle and rate-limit key
    pub fn ip_or_unknown(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }

    pub fn meta(&self) -> ClientMeta {
        ClientMeta {
            ip_address: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Entry `hops` positions from the right of the combined header list
fn forwarded_hop(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    let mut entries = Vec::new();
    for value in headers.get_all("x-forwarded-for") {
        let value = value.to_str().ok()?;
        entries.extend(value.split(',').map(str::trim));
    }

    let index = entries.len().checked_sub(hops)?;
    entries[index].parse::<IpAddr>().ok()
}

#[async_trait]
impl FromRequestParts<AppState> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Client::from_parts(
            &parts.headers,
            peer,
            state.config.api.trusted_proxy_hops,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "198.51.100.7:5000".parse().unwrap()
    }

    #[test]
    fn test_client_ignores_forwarded_for_without_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let client = Client::from_parts(&headers, Some(peer()), 0);

        assert_eq!(client.ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_client_reads_trusted_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.9.9.9, 203.0.113.9, 10.0.0.1"),
        );

        // one proxy: the entry it appended is the caller
        let client = Client::from_parts(&headers, Some(peer()), 1);
        assert_eq!(client.ip.as_deref(), Some("10.0.0.1"));

        let client = Client::from_parts(&headers, Some(peer()), 2);
        assert_eq!(client.ip.as_deref(), Some("203.0.113.9"));

        // more hops than entries: the header didn't pass every proxy
        let client = Client::from_parts(&headers, Some(peer()), 4);
        assert_eq!(client.ip.as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn test_client_reads_repeated_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        headers.append("x-forwarded-for", HeaderValue::from_static("192.0.2.10"));

        let client = Client::from_parts(&headers, Some(peer()), 1);
        assert_eq!(client.ip.as_deref(), Some("192.0.2.10"));
    }

    #[test]
    fn test_client_rejects_non_ip_hop() {
        let long = "a".repeat(200);
        for value in ["not-an-ip", "unknown", long.as_str()] {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());

            let client = Client::from_parts(&headers, Some(peer()), 1);
            assert_eq!(client.ip.as_deref(), Some("198.51.100.7"), "{value}");
        }
    }

    #[test]
    fn test_client_ip_fits_session_column() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("ffff:ffff:ffff:ffff:ffff:ffff:255.255.255.255"),
        );

        let client = Client::from_parts(&headers, Some(peer()), 1);
        assert!(client.ip.unwrap().len() <= 64);
    }

    #[test]
    fn test_client_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.4:443".parse().unwrap();
        let client = Client::from_parts(&HeaderMap::new(), Some(peer), 1);
        assert_eq!(client.ip_or_unknown(), "192.0.2.4");

        let client = Client::from_parts(&HeaderMap::new(), None, 0);
        assert_eq!(client.ip_or_unknown(), "unknown");
        assert_eq!(client.meta(), ClientMeta::default());
    }
}
