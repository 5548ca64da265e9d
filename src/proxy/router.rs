// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request classification.
//!
//! Every inbound path is either reserved for the proxy itself (under the
//! management prefix) or belongs to the application. The management prefix
//! always wins, even when a protected path pattern overlaps it.
//!
//! Paths are classified after dot-segment resolution, so `/public/../admin`
//! and `/x/%2e%2e/admin` are seen as `/admin` by every later stage.

use url::Url;

/// Classification of an inbound request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Served by the proxy or passed to the identity API
    Management,
    /// Forwarded to the upstream application
    Application,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Management => "management",
            RequestClass::Application => "application",
        }
    }
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve dot segments in `path` the way the outbound URL will.
///
/// `base` only supplies a scheme and host; its own path is ignored.
pub fn normalize_path(base: &Url, path: &str) -> String {
    let mut url = base.clone();
    url.set_path(path);
    url.path().to_string()
}

/// Classify `path` against the management `prefix` (no trailing slash).
pub fn classify(prefix: &str, path: &str) -> RequestClass {
    match path.strip_prefix(prefix) {
        Some("") => RequestClass::Management,
        Some(rest) if rest.starts_with('/') => RequestClass::Management,
        _ => RequestClass::Application,
    }
}

/// Path below the management prefix, always starting with `/`.
///
/// Returns `None` when `path` is not a management path.
pub fn management_subpath<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}
