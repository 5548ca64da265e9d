// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error types surfaced by the proxy.
//!
//! [`ProxyError`] is what a client sees when a request cannot be served.
//! [`StartupError`] aborts the process before the listener opens.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::{KeyError, ResolverError};
use crate::config::ConfigError;
use crate::proxy::forward::UpstreamError;
use crate::tls::TlsProvisionError;

/// Request-level failure.
///
/// Messages are fixed strings; the underlying cause is logged, never
/// returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Identity service is unavailable")]
    IdentityUnavailable,

    #[error("Identity service did not respond in time")]
    IdentityTimeout,

    #[error("Upstream service is unavailable")]
    UpstreamUnavailable,

    #[error("Upstream service did not respond in time")]
    UpstreamTimeout,

    #[error("Request could not be forwarded")]
    BadRequest,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl ProxyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ProxyError::IdentityUnavailable => "identity_unavailable",
            ProxyError::IdentityTimeout => "identity_timeout",
            ProxyError::UpstreamUnavailable => "upstream_unavailable",
            ProxyError::UpstreamTimeout => "upstream_timeout",
            ProxyError::BadRequest => "bad_request",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::IdentityUnavailable | ProxyError::UpstreamUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::IdentityTimeout | ProxyError::UpstreamTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ProxyError::BadRequest => StatusCode::BAD_REQUEST,
        }
    }

    /// Session resolution failed on a protected path.
    pub fn identity(timeout: bool) -> Self {
        if timeout {
            ProxyError::IdentityTimeout
        } else {
            ProxyError::IdentityUnavailable
        }
    }
}

impl From<&ResolverError> for ProxyError {
    fn from(e: &ResolverError) -> Self {
        ProxyError::identity(e.is_timeout())
    }
}

impl From<&UpstreamError> for ProxyError {
    fn from(e: &UpstreamError) -> Self {
        match e {
            UpstreamError::Timeout => ProxyError::UpstreamTimeout,
            UpstreamError::Unreachable(_) => ProxyError::UpstreamUnavailable,
            UpstreamError::InvalidRequest(_) => ProxyError::BadRequest,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
            error_code: self.error_code(),
        });
        (self.status_code(), body).into_response()
    }
}

/// Fatal start-up failure.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("signing key unavailable: {0}")]
    Keys(#[from] KeyError),

    #[error("TLS provisioning failed: {0}")]
    Tls(#[from] TlsProvisionError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("invalid listen address {addr}: {reason}")]
    ListenAddr { addr: String, reason: String },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

impl From<ResolverError> for StartupError {
    fn from(e: ResolverError) -> Self {
        StartupError::HttpClient(e.to_string())
    }
}

impl From<UpstreamError> for StartupError {
    fn from(e: UpstreamError) -> Self {
        StartupError::HttpClient(e.to_string())
    }
}
