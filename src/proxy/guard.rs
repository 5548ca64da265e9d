// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access guard for protected application paths.
//!
//! Patterns are case-sensitive path prefixes. A segment enclosed in `<...>`
//! is a regular expression, for example `/orgs/<[0-9]+>/settings`.
//!
//! ## Policy
//!
//! - Unprotected paths are always forwarded, with or without a session.
//! - Protected paths without an active session are redirected to the login
//!   flow with `return_to` set to the original public URL.
//! - Protected paths fail closed when the session resolver fails.

use regex::Regex;
use url::Url;

use crate::auth::session::{ResolverError, Session};
use crate::config::ProxyConfig;

/// Errors raised while compiling protected path patterns.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern \"{0}\" must start with '/'")]
    NotAbsolute(String),

    #[error("pattern \"{0}\" has an unterminated '<' segment")]
    Unbalanced(String),

    #[error("pattern \"{pattern}\" is not a valid expression: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Prefix,
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct ProtectedPath {
    raw: String,
    matcher: Matcher,
}

impl ProtectedPath {
    /// Length of the matched prefix, if the path matches.
    fn match_len(&self, path: &str) -> Option<usize> {
        match &self.matcher {
            Matcher::Prefix => path.starts_with(&self.raw).then_some(self.raw.len()),
            Matcher::Pattern(re) => re.find(path).map(|m| m.end()),
        }
    }
}

/// Ordered, read-only set of protected path matchers.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPathSet {
    paths: Vec<ProtectedPath>,
}

impl ProtectedPathSet {
    /// Compile the configured patterns, preserving their order.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        let paths = patterns
            .iter()
            .map(|p| compile_pattern(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { paths })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Return the pattern with the longest match for `path`.
    ///
    /// Ties keep the earliest configured pattern.
    pub fn longest_match(&self, path: &str) -> Option<&str> {
        let mut best: Option<(usize, &str)> = None;
        for protected in &self.paths {
            if let Some(len) = protected.match_len(path) {
                if best.map(|(l, _)| len > l).unwrap_or(true) {
                    best = Some((len, protected.raw.as_str()));
                }
            }
        }
        best.map(|(_, raw)| raw)
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.longest_match(path).is_some()
    }
}

fn compile_pattern(raw: &str) -> Result<ProtectedPath, PatternError> {
    if !raw.starts_with('/') {
        return Err(PatternError::NotAbsolute(raw.to_string()));
    }
    if !raw.contains('<') {
        return Ok(ProtectedPath {
            raw: raw.to_string(),
            matcher: Matcher::Prefix,
        });
    }

    let mut expr = String::from("^");
    let mut rest = raw;
    while let Some(start) = rest.find('<') {
        expr.push_str(&regex::escape(&rest[..start]));
        let after = &rest[start + 1..];
        let end = after
            .find('>')
            .ok_or_else(|| PatternError::Unbalanced(raw.to_string()))?;
        expr.push('(');
        expr.push_str(&after[..end]);
        expr.push(')');
        rest = &after[end + 1..];
    }
    expr.push_str(&regex::escape(rest));

    let re = Regex::new(&expr).map_err(|source| PatternError::Regex {
        pattern: raw.to_string(),
        source,
    })?;
    Ok(ProtectedPath {
        raw: raw.to_string(),
        matcher: Matcher::Pattern(re),
    })
}

/// Outcome of the access check for an application request.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Forward upstream
    Allow,
    /// Redirect the browser to the login flow
    Login(Url),
    /// Fail closed because the session could not be resolved
    ResolverFailed { timeout: bool },
}

/// Decide what happens to an application request.
///
/// `path` is the normalized request path, `protected` the matching pattern
/// (if any) and `resolution` the result of the session lookup.
pub fn evaluate(
    config: &ProxyConfig,
    path: &str,
    query: Option<&str>,
    protected: Option<&str>,
    resolution: &Result<Option<Session>, ResolverError>,
) -> Verdict {
    if protected.is_none() {
        return Verdict::Allow;
    }
    match resolution {
        Ok(Some(session)) if session.active => Verdict::Allow,
        Ok(_) => Verdict::Login(login_redirect_url(config, path, query)),
        Err(e) => Verdict::ResolverFailed {
            timeout: e.is_timeout(),
        },
    }
}

/// Login flow URL carrying the original public URL as `return_to`.
///
/// The path is set verbatim, never resolved as a reference, so `//host/x`
/// stays on the public host.
pub fn login_redirect_url(config: &ProxyConfig, path: &str, query: Option<&str>) -> Url {
    let mut return_to = config.public_url.clone();
    return_to.set_path(path);
    return_to.set_query(query);

    let mut login = config.login_url();
    login
        .query_pairs_mut()
        .append_pair("return_to", return_to.as_str());
    login
}
