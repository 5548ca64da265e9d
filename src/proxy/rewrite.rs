// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Response header rewriting.
//!
//! Two ordered rules run on every proxied response:
//!
//! 1. **Location**: relative targets and targets on the origin itself are
//!    rebased onto the public URL (under the mount prefix, if any). A target
//!    that ends up at the bare public site root is replaced by the default
//!    redirect. Targets on foreign hosts are left alone.
//! 2. **Set-Cookie**: a `Domain` equal to the origin host becomes the
//!    configured cookie domain, or is dropped when no override is set and the
//!    origin host differs from the public host. Host-only cookies receive the
//!    override when one is configured.

use axum::http::{
    header::{LOCATION, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use url::Url;

use crate::config::ProxyConfig;

/// Rewrite rules for responses coming from one origin.
#[derive(Debug, Clone)]
pub struct RewriteRules {
    origin: Url,
    public_url: Url,
    mount: String,
    cookie_domain: Option<String>,
    default_redirect: Url,
}

impl RewriteRules {
    /// Rules for the upstream application, mounted at the site root.
    pub fn for_upstream(config: &ProxyConfig) -> Self {
        Self {
            origin: config.upstream.clone(),
            public_url: config.public_url.clone(),
            mount: String::new(),
            cookie_domain: config.cookie_domain.clone(),
            default_redirect: config.default_redirect.clone(),
        }
    }

    /// Rules for the identity API, mounted under the management prefix.
    pub fn for_identity_api(config: &ProxyConfig) -> Self {
        Self {
            origin: config.identity_api.clone(),
            public_url: config.public_url.clone(),
            mount: config.management_prefix.clone(),
            cookie_domain: config.cookie_domain.clone(),
            default_redirect: config.default_redirect.clone(),
        }
    }

    /// Apply both rules to a response header map in place.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(rewritten) = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| self.location(v))
        {
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                headers.insert(LOCATION, value);
            }
        }

        let cookies: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
        if cookies.is_empty() {
            return;
        }
        headers.remove(SET_COOKIE);
        for original in cookies {
            let rewritten = original
                .to_str()
                .ok()
                .and_then(|v| self.set_cookie(v))
                .and_then(|v| HeaderValue::from_str(&v).ok());
            headers.append(SET_COOKIE, rewritten.unwrap_or(original));
        }
    }

    /// Rewrite a `Location` value. `None` means leave it unchanged.
    pub fn location(&self, value: &str) -> Option<String> {
        let resolved = self.origin.join(value.trim()).ok()?;

        if same_origin(&resolved, &self.origin) {
            let base = self.origin.path().trim_end_matches('/');
            let rest = resolved
                .path()
                .strip_prefix(base)
                .filter(|r| r.is_empty() || r.starts_with('/'))
                .unwrap_or(resolved.path());

            let mut target = self.public_url.clone();
            target.set_path(&format!("{}{}", self.mount, rest));
            target.set_query(resolved.query());
            target.set_fragment(resolved.fragment());
            return Some(self.substitute_root(target).to_string());
        }

        if same_origin(&resolved, &self.public_url) && is_bare_root(&resolved) {
            return Some(self.default_redirect.to_string());
        }
        None
    }

    fn substitute_root(&self, target: Url) -> Url {
        if is_bare_root(&target) {
            self.default_redirect.clone()
        } else {
            target
        }
    }

    /// Rewrite a `Set-Cookie` value. `None` means leave it unchanged.
    pub fn set_cookie(&self, value: &str) -> Option<String> {
        let origin_host = self.origin.host_str()?.to_ascii_lowercase();
        let public_host = self.public_url.host_str().unwrap_or_default().to_ascii_lowercase();

        let mut parts: Vec<String> = value.split(';').map(|p| p.trim().to_string()).collect();
        let domain_index = parts.iter().skip(1).position(|p| {
            p.split_once('=')
                .map(|(k, _)| k.trim().eq_ignore_ascii_case("domain"))
                .unwrap_or(false)
        });

        match domain_index.map(|i| i + 1) {
            Some(index) => {
                let domain = parts[index]
                    .split_once('=')
                    .map(|(_, d)| normalize_domain(d))
                    .unwrap_or_default();
                if domain != origin_host {
                    return None;
                }
                match &self.cookie_domain {
                    Some(override_domain) => {
                        parts[index] = format!("Domain={override_domain}");
                    }
                    None if origin_host != public_host => {
                        parts.remove(index);
                    }
                    None => return None,
                }
            }
            None => {
                let override_domain = self.cookie_domain.as_ref()?;
                parts.push(format!("Domain={override_domain}"));
            }
        }

        Some(parts.join("; "))
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn is_bare_root(url: &Url) -> bool {
    url.path() == "/" && url.query().is_none() && url.fragment().is_none()
}
