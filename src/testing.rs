// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests: a fake identity API, a fake upstream
//! application and a helper that serves a router on an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::session::Session;

pub const SESSION_COOKIE: &str = "ory_kratos_session";
pub const IDENTITY_ID: &str = "18aafd3e-b00c-4b19-81c8-351e38705126";

/// Serve `router` on `127.0.0.1:0` and return the bound address.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn sample_session_json() -> Value {
    json!({
        "id": "821f5a53-a0b3-41fa-9c62-764560fa4406",
        "active": true,
        "expires_at": "2099-02-25T09:25:37.929792Z",
        "authenticated_at": "2021-02-24T09:25:37.931774Z",
        "issued_at": "2021-02-24T09:25:37.929813Z",
        "identity": {
            "id": IDENTITY_ID,
            "schema_id": "default",
            "schema_url": "https://example.projects.oryapis.com/schemas/default",
            "traits": { "email": "foo@bar" }
        }
    })
}

pub fn sample_session() -> Session {
    serde_json::from_value(sample_session_json()).unwrap()
}

/// Identity API double. The session cookie value selects the behaviour:
/// `valid`, `inactive`, `boom` (500), `garbage` (bad JSON), `slow`
/// (sleeps 2s); anything else is 401.
pub fn fake_identity_api() -> Router {
    Router::new()
        .route("/sessions/whoami", get(whoami))
        .route("/self-service/login/browser", get(login_flow))
        .route("/health/alive", get(|| async { Json(json!({ "status": "ok" })) }))
}

async fn whoami(headers: HeaderMap) -> Response {
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let value = cookie
        .strip_prefix(&format!("{SESSION_COOKIE}="))
        .unwrap_or_default();

    match value {
        "valid" => Json(sample_session_json()).into_response(),
        "inactive" => {
            let mut session = sample_session_json();
            session["active"] = json!(false);
            Json(session).into_response()
        }
        "boom" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "garbage" => (StatusCode::OK, "not json").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(sample_session_json()).into_response()
        }
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Mimics the identity provider starting a login flow on its own host.
async fn login_flow(headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, format!("http://{host}/ui/login?flow=1"))
        .header(
            header::SET_COOKIE,
            "csrf_token=abc; Path=/; HttpOnly",
        )
        .body(Body::empty())
        .unwrap()
}

/// Upstream double that echoes what it received as JSON.
///
/// `/redirect-root` answers `Location: /`, `/set-cookie` sets a cookie for
/// the host it was addressed as, `/stream` returns a chunked body.
pub fn fake_upstream() -> Router {
    Router::new()
        .route("/redirect-root", get(|| async { redirect_to("/") }))
        .route("/set-cookie", get(set_cookie_for_host))
        .route("/stream", get(stream_body))
        .fallback(any(echo))
}

fn redirect_to(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap()
}

async fn stream_body() -> Response {
    let chunks = (0..4).map(|i| Ok::<_, std::io::Error>(format!("chunk-{i}\n")));
    Body::from_stream(futures_util::stream::iter(chunks)).into_response()
}

async fn set_cookie_for_host(headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let domain = host.rsplit_once(':').map_or(host, |(name, _)| name);
    (
        [(header::SET_COOKIE, format!("sid=1; Domain={domain}; Path=/"))],
        "ok",
    )
        .into_response()
}

async fn echo(request: Request) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let headers: serde_json::Map<String, Value> = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                Value::String(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Json(json!({
        "method": parts.method.as_str(),
        "uri": parts.uri.to_string(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}
