// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Proxy Pipeline
//!
//! Every request that does not hit a built-in management endpoint lands in
//! [`dispatch`]. The path is normalized once up front and that form is used
//! for classification, matching, `return_to` and the outbound URL:
//!
//! ```text
//! classify ─┬─ management ──────────────────────────────► identity API
//!           └─ application ─► resolve ─► guard ─► mint ─► upstream
//! ```
//!
//! Session resolution is skipped when token issuance is off and the path is
//! not protected. A resolver failure on an unprotected path is treated as "no
//! session"; on a protected path it fails closed with 502 or 504.

pub mod forward;
pub mod guard;
pub mod rewrite;
pub mod router;

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, error, info, warn};

use crate::error::ProxyError;
use crate::state::AppState;
use forward::Authorization;
use guard::Verdict;
use router::RequestClass;

/// Fallback handler for all proxied traffic.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let path = router::normalize_path(&state.config.public_url, request.uri().path());
    match router::classify(&state.config.management_prefix, &path) {
        RequestClass::Management => forward_to_identity_api(&state, &path, request).await,
        RequestClass::Application => forward_to_upstream(&state, &path, request).await,
    }
}

async fn forward_to_identity_api(state: &AppState, path: &str, request: Request) -> Response {
    let subpath = router::management_subpath(&state.config.management_prefix, path).unwrap_or("/");
    debug!(path, subpath, class = %RequestClass::Management, "Forwarding to identity API");

    state
        .forwarder
        .forward(
            &state.config,
            &state.config.identity_api,
            subpath,
            request,
            Authorization::Preserve,
            &state.identity_rules,
        )
        .await
        .unwrap_or_else(|e| {
            error!(
                path,
                class = %RequestClass::Management,
                error_kind = e.kind(),
                error = %e,
                "Identity API request failed"
            );
            ProxyError::from(&e).into_response()
        })
}

async fn forward_to_upstream(state: &AppState, path: &str, request: Request) -> Response {
    let config = &state.config;
    let protected = config.protected_paths.longest_match(path).map(str::to_owned);

    let resolution = if protected.is_some() || config.issue_tokens {
        state.resolver.resolve(request.headers()).await
    } else {
        Ok(None)
    };
    if let Err(e) = &resolution {
        warn!(
            path,
            class = %RequestClass::Application,
            protected = protected.is_some(),
            error_kind = e.kind(),
            error = %e,
            "Session resolution failed"
        );
    }

    let verdict = guard::evaluate(
        config,
        path,
        request.uri().query(),
        protected.as_deref(),
        &resolution,
    );
    match verdict {
        Verdict::Allow => {}
        Verdict::Login(url) => {
            info!(path, pattern = protected.as_deref(), "No session, redirecting to login");
            return Redirect::to(url.as_str()).into_response();
        }
        Verdict::ResolverFailed { timeout } => {
            return ProxyError::identity(timeout).into_response();
        }
    }

    let authorization = match resolution {
        Ok(Some(session)) if config.issue_tokens => match state.minter.mint(&session) {
            Ok(token) => {
                debug!(path, sub = %token.subject, exp = token.expires_at, "Minted token");
                Authorization::Replace(token.bearer())
            }
            Err(e) => {
                warn!(path, error = %e, "Token minting failed, forwarding without token");
                Authorization::Strip
            }
        },
        _ => Authorization::Strip,
    };

    state
        .forwarder
        .forward(
            config,
            &config.upstream,
            path,
            request,
            authorization,
            &state.upstream_rules,
        )
        .await
        .unwrap_or_else(|e| {
            error!(
                path,
                class = %RequestClass::Application,
                error_kind = e.kind(),
                error = %e,
                "Upstream request failed"
            );
            ProxyError::from(&e).into_response()
        })
}
