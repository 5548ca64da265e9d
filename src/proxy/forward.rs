// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Forwarding engine.
//!
//! Relays one inbound request to an origin (the upstream application or the
//! identity API) and relays the answer back. Bodies are streamed in both
//! directions and never buffered.
//!
//! Outbound requests lose hop-by-hop headers, `Host`, any header named in
//! `Connection`, and (for application traffic) any client-supplied
//! `Authorization`. `X-Forwarded-*` headers describe the public side.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{
        header::{self, HeaderName},
        HeaderMap, HeaderValue,
    },
    response::Response,
};
use url::Url;

use super::rewrite::RewriteRules;
use crate::config::ProxyConfig;

/// Time allowed to open a connection to an origin.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that only apply to a single connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Errors talking to an origin.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("origin timed out")]
    Timeout,

    #[error("origin unreachable: {0}")]
    Unreachable(String),

    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout => "timeout",
            UpstreamError::Unreachable(_) => "unreachable",
            UpstreamError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// What to do with the `Authorization` header on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Drop whatever the client sent
    Strip,
    /// Drop the client's value and send this one instead
    Replace(String),
    /// Pass the client's value through unchanged
    Preserve,
}

/// Shared HTTP client for all origins.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forward `request` to `base` + `path`, keeping the original query.
    pub async fn forward(
        &self,
        config: &ProxyConfig,
        base: &Url,
        path: &str,
        request: Request,
        authorization: Authorization,
        rules: &RewriteRules,
    ) -> Result<Response, UpstreamError> {
        let target = target_url(base, path, request.uri().query());
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let (parts, body) = request.into_parts();
        let mut headers = sanitize_headers(&parts.headers);
        match authorization {
            Authorization::Strip => {
                headers.remove(header::AUTHORIZATION);
            }
            Authorization::Replace(value) => {
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
                headers.insert(header::AUTHORIZATION, value);
            }
            Authorization::Preserve => {}
        }
        add_forwarded_headers(&mut headers, &parts.headers, config, client_addr);

        let mut outbound = self
            .client
            .request(parts.method, target.as_str())
            .headers(headers);
        if has_body(&parts.headers) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outbound.send().await.map_err(classify_error)?;

        let status = upstream.status();
        let mut response_headers = sanitize_headers(upstream.headers());
        rules.apply(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn classify_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else if e.is_builder() {
        UpstreamError::InvalidRequest(e.to_string())
    } else {
        UpstreamError::Unreachable(e.to_string())
    }
}

/// Join the origin base path with the request path.
pub fn target_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    target.set_path(if joined.is_empty() { "/" } else { &joined });
    target.set_query(query);
    target.set_fragment(None);
    target
}

/// Copy `headers` minus hop-by-hop headers, anything named in `Connection`,
/// and `Host`.
pub fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name_str = name.as_str();
        if name == header::HOST
            || HOP_BY_HOP.contains(&name_str)
            || listed.iter().any(|l| l == name_str)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn add_forwarded_headers(
    headers: &mut HeaderMap,
    inbound: &HeaderMap,
    config: &ProxyConfig,
    client_addr: Option<SocketAddr>,
) {
    let host = inbound
        .get(header::HOST)
        .cloned()
        .or_else(|| HeaderValue::from_str(&public_authority(&config.public_url)).ok());
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    if let Ok(proto) = HeaderValue::from_str(config.public_url.scheme()) {
        headers.insert(X_FORWARDED_PROTO, proto);
    }

    if let Some(addr) = client_addr {
        let chain = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.trim().is_empty() => format!("{prior}, {}", addr.ip()),
            _ => addr.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
}

fn public_authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_and_host_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.org"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Debug"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-debug", HeaderValue::from_static("1"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let out = sanitize_headers(&headers);

        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("x-debug").is_none());
        assert!(out.get(header::TE).is_none());
        assert!(out.get(header::UPGRADE).is_none());
        assert_eq!(out[header::ACCEPT], "text/html");
        assert_eq!(out.get_all(header::COOKIE).iter().count(), 2);
    }

    #[test]
    fn target_url_keeps_base_path_and_query() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        assert_eq!(
            target_url(&base, "/admin/users", Some("page=2")).as_str(),
            "http://localhost:3000/admin/users?page=2"
        );

        let base = Url::parse("http://localhost:4433/api/kratos/public/").unwrap();
        assert_eq!(
            target_url(&base, "/sessions/whoami", None).as_str(),
            "http://localhost:4433/api/kratos/public/sessions/whoami"
        );
    }

    #[test]
    fn body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!has_body(&headers));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(has_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(has_body(&chunked));
    }

    #[test]
    fn forwarded_headers_describe_public_side() {
        let config = ProxyConfig::builder("http://localhost:3000")
            .public_url("https://example.org")
            .identity_api("http://localhost:4433")
            .build()
            .unwrap();

        let mut inbound = HeaderMap::new();
        inbound.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        let mut out = HeaderMap::new();
        add_forwarded_headers(
            &mut out,
            &inbound,
            &config,
            Some("198.51.100.2:5555".parse().unwrap()),
        );

        assert_eq!(out[&X_FORWARDED_HOST], "example.org");
        assert_eq!(out[&X_FORWARDED_PROTO], "https");
        assert_eq!(out[&X_FORWARDED_FOR], "203.0.113.7, 198.51.100.2");
    }

    #[test]
    fn error_kinds() {
        assert!(UpstreamError::Timeout.is_timeout());
        assert_eq!(UpstreamError::Unreachable("x".into()).kind(), "unreachable");
        assert!(!UpstreamError::InvalidRequest("x".into()).is_timeout());
    }
}
