// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session resolution against the identity API.
//!
//! The resolver looks for the identity-provider session cookie and, when
//! present, asks the identity API's `whoami` endpoint who the caller is.
//!
//! | whoami outcome | Result |
//! |----------------|--------|
//! | no session cookie | `Ok(None)`, no network call |
//! | 2xx, `active: true` | `Ok(Some(session))` |
//! | 2xx, `active: false` / 401 / 403 | `Ok(None)` |
//! | timeout | `Err(ResolverError::Timeout)` |
//! | any other status, transport failure, bad JSON | `Err(..)` |
//!
//! No retries are attempted inline.

use std::time::Duration;

use axum::http::{header::COOKIE, HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::ProxyConfig;

/// Path of the whoami endpoint, relative to the identity API base URL.
const WHOAMI_PATH: &str = "sessions/whoami";

/// Liveness endpoint of the identity API, used by the readiness probe.
const ALIVE_PATH: &str = "health/alive";

/// Session resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("identity API did not answer within the resolver timeout")]
    Timeout,

    #[error("identity API unreachable: {0}")]
    Transport(String),

    #[error("identity API returned unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("identity API returned a malformed session: {0}")]
    InvalidResponse(String),

    #[error("failed to build identity API client: {0}")]
    Client(String),
}

impl ResolverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolverError::Timeout)
    }

    /// Short machine-readable kind, safe for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolverError::Timeout => "timeout",
            ResolverError::Transport(_) => "transport",
            ResolverError::UnexpectedStatus(_) => "unexpected_status",
            ResolverError::InvalidResponse(_) => "invalid_response",
            ResolverError::Client(_) => "client",
        }
    }
}

/// Identity attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub schema_id: String,
    #[serde(default)]
    pub schema_url: String,
    /// Opaque trait document defined by the identity schema
    #[serde(default)]
    pub traits: Value,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An identity-provider session, valid for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub authenticated_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub identity: Identity,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Identity ID, used as the token subject.
    pub fn subject(&self) -> &str {
        &self.identity.id
    }
}

/// Resolves the inbound session cookie into a [`Session`].
#[derive(Clone)]
pub struct SessionResolver {
    whoami_url: Url,
    alive_url: Url,
    cookie_name: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl SessionResolver {
    /// Create a resolver for the configured identity API.
    pub fn new(config: &ProxyConfig) -> Result<Self, ResolverError> {
        let whoami_url = config
            .identity_api
            .join(WHOAMI_PATH)
            .map_err(|e| ResolverError::Client(e.to_string()))?;
        let alive_url = config
            .identity_api
            .join(ALIVE_PATH)
            .map_err(|e| ResolverError::Client(e.to_string()))?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ResolverError::Client(e.to_string()))?;

        Ok(Self {
            whoami_url,
            alive_url,
            cookie_name: config.session_cookie_name.clone(),
            timeout: config.resolver_timeout,
            client,
        })
    }

    /// Get the whoami URL.
    pub fn whoami_url(&self) -> &Url {
        &self.whoami_url
    }

    /// Extract the session cookie value from the request headers.
    pub fn session_cookie<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        find_cookie(headers, &self.cookie_name)
    }

    /// Resolve the caller's session.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Session>, ResolverError> {
        let Some(value) = self.session_cookie(headers) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(self.whoami_url.clone())
            .header(COOKIE, format!("{}={}", self.cookie_name, value))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolverError::UnexpectedStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify_transport_error)?;
        let session: Session = serde_json::from_slice(&body)
            .map_err(|e| ResolverError::InvalidResponse(e.to_string()))?;

        if !session.active {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Check that the identity API answers at all. Any status below 500
    /// counts as reachable.
    pub async fn probe(&self) -> Result<(), ResolverError> {
        let response = self
            .client
            .get(self.alive_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if response.status().is_server_error() {
            return Err(ResolverError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

fn classify_transport_error(e: reqwest::Error) -> ResolverError {
    if e.is_timeout() {
        ResolverError::Timeout
    } else {
        ResolverError::Transport(e.to_string())
    }
}

/// Find a cookie by name across all `Cookie` headers.
pub fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_identity_api, sample_session, spawn, SESSION_COOKIE};
    use axum::http::HeaderValue;

    fn resolver_for(identity_api: &str, timeout: Duration) -> SessionResolver {
        let config = ProxyConfig::builder("http://localhost:3000")
            .identity_api(identity_api)
            .resolver_timeout(timeout)
            .build()
            .unwrap();
        SessionResolver::new(&config).unwrap()
    }

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn find_cookie_picks_named_cookie() {
        let headers = cookie_headers("theme=dark; ory_kratos_session=abc123; other=1");
        assert_eq!(find_cookie(&headers, SESSION_COOKIE), Some("abc123"));
        assert_eq!(find_cookie(&headers, "missing"), None);
    }

    #[test]
    fn find_cookie_searches_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("ory_kratos_session=xyz"));
        assert_eq!(find_cookie(&headers, SESSION_COOKIE), Some("xyz"));
    }

    #[test]
    fn find_cookie_ignores_empty_values() {
        let headers = cookie_headers("ory_kratos_session=");
        assert_eq!(find_cookie(&headers, SESSION_COOKIE), None);
    }

    #[test]
    fn whoami_url_is_joined_onto_identity_api() {
        let resolver = resolver_for("http://localhost:4433/api/kratos/public", Duration::from_secs(1));
        assert_eq!(
            resolver.whoami_url().as_str(),
            "http://localhost:4433/api/kratos/public/sessions/whoami"
        );
    }

    #[test]
    fn session_deserializes_and_keeps_unknown_fields() {
        let json = serde_json::json!({
            "id": "821f5a53-a0b3-41fa-9c62-764560fa4406",
            "active": true,
            "expires_at": "2021-02-25T09:25:37.929792Z",
            "authenticated_at": "2021-02-24T09:25:37.931774Z",
            "issued_at": "2021-02-24T09:25:37.929813Z",
            "authenticator_assurance_level": "aal1",
            "identity": {
                "id": "18aafd3e-b00c-4b19-81c8-351e38705126",
                "schema_id": "default",
                "schema_url": "https://example.org/schemas/default",
                "traits": { "email": "foo@bar" },
                "state": "active"
            }
        });
        let session: Session = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(session.subject(), "18aafd3e-b00c-4b19-81c8-351e38705126");
        assert_eq!(session.identity.traits["email"], "foo@bar");
        assert_eq!(session.extra["authenticator_assurance_level"], "aal1");
        assert_eq!(session.identity.extra["state"], "active");

        let round = serde_json::to_value(&session).unwrap();
        assert_eq!(round["authenticator_assurance_level"], "aal1");
        assert_eq!(round["identity"]["traits"]["email"], "foo@bar");
    }

    #[tokio::test]
    async fn no_cookie_means_no_session_without_network_call() {
        // Port 9 (discard) is never contacted when the cookie is missing.
        let resolver = resolver_for("http://127.0.0.1:9", Duration::from_secs(1));
        let result = resolver.resolve(&HeaderMap::new()).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn active_session_is_resolved() {
        let addr = spawn(fake_identity_api()).await;
        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_secs(5));

        let session = resolver
            .resolve(&cookie_headers("ory_kratos_session=valid"))
            .await
            .unwrap()
            .expect("session");
        assert_eq!(session, sample_session());
    }

    #[tokio::test]
    async fn unauthorized_and_inactive_mean_no_session() {
        let addr = spawn(fake_identity_api()).await;
        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_secs(5));

        let result = resolver.resolve(&cookie_headers("ory_kratos_session=expired")).await;
        assert!(matches!(result, Ok(None)));

        let result = resolver.resolve(&cookie_headers("ory_kratos_session=inactive")).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn server_errors_and_bad_bodies_are_resolver_errors() {
        let addr = spawn(fake_identity_api()).await;
        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_secs(5));

        let result = resolver.resolve(&cookie_headers("ory_kratos_session=boom")).await;
        assert!(matches!(result, Err(ResolverError::UnexpectedStatus(500))));

        let result = resolver.resolve(&cookie_headers("ory_kratos_session=garbage")).await;
        assert!(matches!(result, Err(ResolverError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn slow_identity_api_times_out() {
        let addr = spawn(fake_identity_api()).await;
        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_millis(100));

        let result = resolver.resolve(&cookie_headers("ory_kratos_session=slow")).await;
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn unreachable_identity_api_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_secs(2));
        let result = resolver.resolve(&cookie_headers("ory_kratos_session=valid")).await;
        assert!(matches!(result, Err(ResolverError::Transport(_))));
        assert!(resolver.probe().await.is_err());
    }

    #[tokio::test]
    async fn probe_succeeds_against_live_identity_api() {
        let addr = spawn(fake_identity_api()).await;
        let resolver = resolver_for(&format!("http://{addr}"), Duration::from_secs(5));
        resolver.probe().await.unwrap();
    }
}
