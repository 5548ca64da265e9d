// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::state::AppState;

/// Upstream verifiers may cache the key set for this long.
const JWKS_CACHE_CONTROL: &str = "public, max-age=300";

/// Public key set for verifying minted tokens.
///
/// Contains public parameters only. The set is fixed for the life of the
/// process, so repeated reads return identical documents.
#[utoipa::path(
    get,
    path = "/.ory/jwks.json",
    tag = "Keys",
    responses(
        (status = 200, description = "JSON Web Key Set", content_type = "application/json")
    )
)]
pub async fn jwks(State(state): State<AppState>) -> Response {
    (
        [(header::CACHE_CONTROL, JWKS_CACHE_CONTROL)],
        Json(state.keys.jwks().clone()),
    )
        .into_response()
}
