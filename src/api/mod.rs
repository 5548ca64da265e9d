// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, routing::get, Json, Router};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::config::DEFAULT_MANAGEMENT_PREFIX;
use crate::{proxy, state::AppState};

pub mod health;
pub mod jwks;

/// Build the complete HTTP surface.
///
/// Built-in management endpoints are matched first; everything else goes
/// through [`proxy::dispatch`].
pub fn router(state: AppState) -> Router {
    let prefix = state.config.management_prefix.clone();

    Router::new()
        .route(&format!("{prefix}/jwks.json"), get(jwks::jwks))
        .route(&format!("{prefix}/proxy/health"), get(health::liveness))
        .route(&format!("{prefix}/proxy/health/ready"), get(health::readiness))
        .route(&format!("{prefix}/proxy/openapi.json"), get(openapi))
        .fallback(proxy::dispatch)
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Prefix the documented paths are written under.
const DOCUMENTED_PREFIX: &str = DEFAULT_MANAGEMENT_PREFIX;

async fn openapi(State(state): State<AppState>) -> Json<utoipa::openapi::OpenApi> {
    Json(openapi_for_prefix(&state.config.management_prefix))
}

/// OpenAPI document with paths moved under the configured management prefix.
fn openapi_for_prefix(prefix: &str) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    if prefix != DOCUMENTED_PREFIX {
        doc.paths.paths = std::mem::take(&mut doc.paths.paths)
            .into_iter()
            .map(|(path, item)| match path.strip_prefix(DOCUMENTED_PREFIX) {
                Some(rest) => (format!("{prefix}{rest}"), item),
                None => (path, item),
            })
            .collect();
    }
    doc
}

#[derive(OpenApi)]
#[openapi(
    paths(jwks::jwks, health::liveness, health::readiness),
    components(schemas(health::HealthResponse, health::ReadyResponse, health::ReadyChecks)),
    tags(
        (name = "Keys", description = "Token verification keys"),
        (name = "Health", description = "Proxy health probes")
    )
)]
struct ApiDoc;
