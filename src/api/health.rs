// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::state::AppState;

/// Liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Crate version
    pub version: String,
    /// `local` or `production`
    pub mode: String,
    /// Key ID tokens are currently signed with
    pub key_id: String,
}

/// Readiness response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyChecks {
    /// Whether the proxy process is running.
    pub service: String,
    /// Identity API reachability.
    pub identity_api: String,
}

/// Liveness probe handler.
///
/// Always returns 200 while the process is serving.
#[utoipa::path(
    get,
    path = "/.ory/proxy/health",
    tag = "Health",
    responses(
        (status = 200, description = "Proxy is alive", body = HealthResponse)
    )
)]
pub async fn liveness(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.config.mode.to_string(),
        key_id: state.keys.key_id().to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 503 when the identity API cannot be reached.
#[utoipa::path(
    get,
    path = "/.ory/proxy/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Proxy is ready", body = ReadyResponse),
        (status = 503, description = "Identity API unreachable", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let identity_ok = match state.resolver.probe().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error_kind = e.kind(), error = %e, "Identity API probe failed");
            false
        }
    };

    let response = ReadyResponse {
        status: if identity_ok { "ok" } else { "degraded" }.to_string(),
        checks: ReadyChecks {
            service: "ok".to_string(),
            identity_api: if identity_ok { "ok" } else { "unavailable" }.to_string(),
        },
    };
    let status = if identity_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
