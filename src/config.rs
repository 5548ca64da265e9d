// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! [`ProxyConfig`] is built exactly once at start-up, either from the
//! environment ([`ProxyConfig::from_env`]) or programmatically through
//! [`ProxyConfigBuilder`]. Every field is validated at construction time;
//! request handlers never re-check configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `4000` |
//! | `UPSTREAM_URL` | Application origin the proxy forwards to | Required |
//! | `PUBLIC_URL` | Public URL of the proxied site (no path) | `http://localhost:<PORT>` |
//! | `ORY_SDK_URL` | Identity API base URL (deprecated, prefer `ORY_PROJECT`) | - |
//! | `ORY_KRATOS_URL` | Alias of `ORY_SDK_URL` (deprecated) | - |
//! | `ORY_PROJECT` | Project slug, expands to `https://<slug>.projects.oryapis.com/` | - |
//! | `MANAGEMENT_PREFIX` | Path prefix reserved for the proxy itself | `/.ory` |
//! | `PROTECT_PATHS` | Comma-separated protected path patterns | empty |
//! | `COOKIE_DOMAIN` | Cookie domain override | empty |
//! | `DEFAULT_REDIRECT_URL` | Redirect target replacing the bare site root | `PUBLIC_URL` |
//! | `WITHOUT_JWT` | Disable token issuance (`true`/`false`) | `false` |
//! | `DEPLOYMENT_MODE` | `local` or `production` | `production` |
//! | `SESSION_COOKIE_NAME` | Identity-provider session cookie name | `ory_kratos_session` |
//! | `RESOLVER_TIMEOUT_SECS` | Timeout of the whoami call | `5` |
//! | `TOKEN_MAX_LIFETIME_SECS` | Upper bound of a minted token's lifetime | `600` |
//! | `SHUTDOWN_GRACE_SECS` | Drain period for in-flight requests | `10` |
//! | `SIGNING_KEY_PATH` | PKCS#8 PEM ES256 key (generated when unset) | - |
//! | `TLS_CERT_PATH` | Local-mode certificate chain (PEM) | Required in `local` mode |
//! | `TLS_KEY_PATH` | Local-mode private key (PEM) | Required in `local` mode |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::proxy::guard::{PatternError, ProtectedPathSet};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const UPSTREAM_URL_ENV: &str = "UPSTREAM_URL";
pub const PUBLIC_URL_ENV: &str = "PUBLIC_URL";
pub const ORY_SDK_URL_ENV: &str = "ORY_SDK_URL";
pub const ORY_KRATOS_URL_ENV: &str = "ORY_KRATOS_URL";
pub const ORY_PROJECT_ENV: &str = "ORY_PROJECT";
pub const MANAGEMENT_PREFIX_ENV: &str = "MANAGEMENT_PREFIX";
pub const PROTECT_PATHS_ENV: &str = "PROTECT_PATHS";
pub const COOKIE_DOMAIN_ENV: &str = "COOKIE_DOMAIN";
pub const DEFAULT_REDIRECT_URL_ENV: &str = "DEFAULT_REDIRECT_URL";
pub const WITHOUT_JWT_ENV: &str = "WITHOUT_JWT";
pub const DEPLOYMENT_MODE_ENV: &str = "DEPLOYMENT_MODE";
pub const SESSION_COOKIE_NAME_ENV: &str = "SESSION_COOKIE_NAME";
pub const RESOLVER_TIMEOUT_ENV: &str = "RESOLVER_TIMEOUT_SECS";
pub const TOKEN_MAX_LIFETIME_ENV: &str = "TOKEN_MAX_LIFETIME_SECS";
pub const SHUTDOWN_GRACE_ENV: &str = "SHUTDOWN_GRACE_SECS";
pub const SIGNING_KEY_PATH_ENV: &str = "SIGNING_KEY_PATH";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_MANAGEMENT_PREFIX: &str = "/.ory";
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "ory_kratos_session";
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TOKEN_MAX_LIFETIME: Duration = Duration::from_secs(600);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Template used to derive the identity API from a project slug.
const PROJECT_URL_TEMPLATE: &str = "https://{slug}.projects.oryapis.com/";

/// Fatal start-up configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("unable to parse \"{value}\" as a URL for {field}: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} must not contain a path, got \"{value}\"")]
    UrlHasPath { field: &'static str, value: String },

    #[error("invalid value \"{value}\" for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("please provide your project slug using {} or set {}", ORY_PROJECT_ENV, ORY_SDK_URL_ENV)]
    MissingIdentityApi,

    #[error("management prefix \"{0}\" must start with '/' and must not be the site root")]
    InvalidManagementPrefix(String),

    #[error("invalid protected path pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("local deployment mode requires {} and {}", TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV)]
    MissingTlsMaterial,
}

/// Deployment mode of the proxy.
///
/// `Local` serves HTTPS with a locally trusted certificate, `Production`
/// serves plain HTTP behind an external TLS terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Local,
    #[default]
    Production,
}

impl FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DeploymentMode::Local),
            "production" | "prod" => Ok(DeploymentMode::Production),
            _ => Err(ConfigError::InvalidValue {
                field: DEPLOYMENT_MODE_ENV,
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Local => write!(f, "local"),
            DeploymentMode::Production => write!(f, "production"),
        }
    }
}

/// Certificate and key locations handed over by the TLS collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Application origin (root path only)
    pub upstream: Url,
    /// Public-facing URL (root path only)
    pub public_url: Url,
    /// Identity API base URL, always ending in `/`
    pub identity_api: Url,
    /// Reserved path prefix, no trailing slash
    pub management_prefix: String,
    /// Compiled protected path patterns
    pub protected_paths: ProtectedPathSet,
    /// Cookie domain override
    pub cookie_domain: Option<String>,
    /// Absolute target that replaces redirects to the bare site root
    pub default_redirect: Url,
    /// Whether sessions are exchanged for a bearer token
    pub issue_tokens: bool,
    pub mode: DeploymentMode,
    pub session_cookie_name: String,
    pub resolver_timeout: Duration,
    pub token_max_lifetime: Duration,
    pub shutdown_grace: Duration,
    /// Optional persisted signing key
    pub signing_key_path: Option<PathBuf>,
    /// Required in local mode
    pub tls: Option<TlsPaths>,
}

impl ProxyConfig {
    /// Start a programmatic configuration.
    pub fn builder(upstream: impl Into<String>) -> ProxyConfigBuilder {
        ProxyConfigBuilder::new(upstream)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key/value source.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upstream = get(UPSTREAM_URL_ENV).ok_or(ConfigError::Missing(UPSTREAM_URL_ENV))?;
        let mut builder = ProxyConfigBuilder::new(upstream);

        if let Some(host) = get(HOST_ENV) {
            builder = builder.host(host);
        }
        if let Some(port) = get(PORT_ENV) {
            builder = builder.port(parse_number(PORT_ENV, &port)?);
        }
        if let Some(public_url) = get(PUBLIC_URL_ENV) {
            builder = builder.public_url(public_url);
        }

        if let Some(sdk_url) = get(ORY_KRATOS_URL_ENV).or_else(|| get(ORY_SDK_URL_ENV)) {
            tracing::warn!(
                "Use of {ORY_SDK_URL_ENV} / {ORY_KRATOS_URL_ENV} is deprecated, please use {ORY_PROJECT_ENV} instead"
            );
            builder = builder.identity_api(sdk_url);
        } else if let Some(slug) = get(ORY_PROJECT_ENV) {
            builder = builder.project_slug(&slug);
        }

        if let Some(prefix) = get(MANAGEMENT_PREFIX_ENV) {
            builder = builder.management_prefix(prefix);
        }
        if let Some(paths) = get(PROTECT_PATHS_ENV) {
            builder = builder.protect_paths(
                paths
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
        if let Some(domain) = get(COOKIE_DOMAIN_ENV) {
            builder = builder.cookie_domain(domain);
        }
        if let Some(redirect) = get(DEFAULT_REDIRECT_URL_ENV) {
            builder = builder.default_redirect(redirect);
        }
        if let Some(without_jwt) = get(WITHOUT_JWT_ENV) {
            builder = builder.issue_tokens(!parse_bool(WITHOUT_JWT_ENV, &without_jwt)?);
        }
        if let Some(mode) = get(DEPLOYMENT_MODE_ENV) {
            builder = builder.mode(mode.parse()?);
        }
        if let Some(name) = get(SESSION_COOKIE_NAME_ENV) {
            builder = builder.session_cookie_name(name);
        }
        if let Some(secs) = get(RESOLVER_TIMEOUT_ENV) {
            builder = builder.resolver_timeout(Duration::from_secs(parse_number(
                RESOLVER_TIMEOUT_ENV,
                &secs,
            )?));
        }
        if let Some(secs) = get(TOKEN_MAX_LIFETIME_ENV) {
            builder = builder.token_max_lifetime(Duration::from_secs(parse_number(
                TOKEN_MAX_LIFETIME_ENV,
                &secs,
            )?));
        }
        if let Some(secs) = get(SHUTDOWN_GRACE_ENV) {
            builder = builder.shutdown_grace(Duration::from_secs(parse_number(
                SHUTDOWN_GRACE_ENV,
                &secs,
            )?));
        }
        if let Some(path) = get(SIGNING_KEY_PATH_ENV) {
            builder = builder.signing_key_path(path);
        }
        match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => builder = builder.tls(cert, key),
            (None, None) => {}
            _ => return Err(ConfigError::MissingTlsMaterial),
        }

        builder.build()
    }

    /// Bind address in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host of the public URL, used for local certificates.
    pub fn public_host(&self) -> &str {
        self.public_url.host_str().unwrap_or("localhost")
    }

    /// Public URL of the identity provider's browser login flow.
    pub fn login_url(&self) -> Url {
        let mut url = self.public_url.clone();
        url.set_path(&format!(
            "{}/self-service/login/browser",
            self.management_prefix
        ));
        url
    }

    /// Path of the published key set document.
    pub fn jwks_path(&self) -> String {
        format!("{}/jwks.json", self.management_prefix)
    }
}

/// Builder for [`ProxyConfig`]. All validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ProxyConfigBuilder {
    host: String,
    port: u16,
    upstream: String,
    public_url: Option<String>,
    identity_api: Option<String>,
    management_prefix: String,
    protect_paths: Vec<String>,
    cookie_domain: Option<String>,
    default_redirect: Option<String>,
    issue_tokens: bool,
    mode: DeploymentMode,
    session_cookie_name: String,
    resolver_timeout: Duration,
    token_max_lifetime: Duration,
    shutdown_grace: Duration,
    signing_key_path: Option<PathBuf>,
    tls: Option<TlsPaths>,
}

impl ProxyConfigBuilder {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream: upstream.into(),
            public_url: None,
            identity_api: None,
            management_prefix: DEFAULT_MANAGEMENT_PREFIX.to_string(),
            protect_paths: Vec::new(),
            cookie_domain: None,
            default_redirect: None,
            issue_tokens: true,
            mode: DeploymentMode::default(),
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
            token_max_lifetime: DEFAULT_TOKEN_MAX_LIFETIME,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            signing_key_path: None,
            tls: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    pub fn identity_api(mut self, url: impl Into<String>) -> Self {
        self.identity_api = Some(url.into());
        self
    }

    /// Derive the identity API from a hosted project slug.
    pub fn project_slug(self, slug: &str) -> Self {
        let url = PROJECT_URL_TEMPLATE.replace("{slug}", slug.trim());
        self.identity_api(url)
    }

    pub fn management_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.management_prefix = prefix.into();
        self
    }

    pub fn protect_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protect_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    pub fn default_redirect(mut self, target: impl Into<String>) -> Self {
        self.default_redirect = Some(target.into());
        self
    }

    pub fn issue_tokens(mut self, enabled: bool) -> Self {
        self.issue_tokens = enabled;
        self
    }

    pub fn mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_name = name.into();
        self
    }

    pub fn resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }

    pub fn token_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_max_lifetime = lifetime;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn signing_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.signing_key_path = Some(path.into());
        self
    }

    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsPaths {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Validate every field and produce the immutable configuration.
    pub fn build(self) -> Result<ProxyConfig, ConfigError> {
        let upstream = parse_root_url(UPSTREAM_URL_ENV, &self.upstream)?;

        let public_url = match &self.public_url {
            Some(url) => parse_root_url(PUBLIC_URL_ENV, url)?,
            None => parse_root_url(PUBLIC_URL_ENV, &format!("http://localhost:{}", self.port))?,
        };

        let identity_api = {
            let raw = self
                .identity_api
                .as_deref()
                .ok_or(ConfigError::MissingIdentityApi)?;
            let mut url = parse_absolute_url(ORY_SDK_URL_ENV, raw)?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            url
        };

        let management_prefix = normalize_prefix(&self.management_prefix)?;
        let protected_paths = ProtectedPathSet::compile(self.protect_paths.as_slice())?;

        let cookie_domain = self
            .cookie_domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let default_redirect = match self.default_redirect.as_deref().map(str::trim) {
            Some(target) if !target.is_empty() => resolve_redirect(&public_url, target)?,
            _ => public_url.clone(),
        };

        if self.session_cookie_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: SESSION_COOKIE_NAME_ENV,
                value: self.session_cookie_name,
            });
        }
        for (field, value) in [
            (RESOLVER_TIMEOUT_ENV, self.resolver_timeout),
            (TOKEN_MAX_LIFETIME_ENV, self.token_max_lifetime),
            (SHUTDOWN_GRACE_ENV, self.shutdown_grace),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: "0".to_string(),
                });
            }
        }

        if self.mode == DeploymentMode::Local && self.tls.is_none() {
            return Err(ConfigError::MissingTlsMaterial);
        }

        Ok(ProxyConfig {
            host: self.host,
            port: self.port,
            upstream,
            public_url,
            identity_api,
            management_prefix,
            protected_paths,
            cookie_domain,
            default_redirect,
            issue_tokens: self.issue_tokens,
            mode: self.mode,
            session_cookie_name: self.session_cookie_name.trim().to_string(),
            resolver_timeout: self.resolver_timeout,
            token_max_lifetime: self.token_max_lifetime,
            shutdown_grace: self.shutdown_grace,
            signing_key_path: self.signing_key_path,
            tls: self.tls,
        })
    }
}

fn parse_absolute_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme \"{}\"", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Parse an absolute URL whose path is the root.
fn parse_root_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let mut url = parse_absolute_url(field, value)?;
    if url.path() != "/" {
        return Err(ConfigError::UrlHasPath {
            field,
            value: value.to_string(),
        });
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Accepts an absolute URL or an absolute path relative to the public URL.
fn resolve_redirect(public_url: &Url, target: &str) -> Result<Url, ConfigError> {
    if target.starts_with('/') {
        return public_url
            .join(target)
            .map_err(|e| ConfigError::InvalidUrl {
                field: DEFAULT_REDIRECT_URL_ENV,
                value: target.to_string(),
                reason: e.to_string(),
            });
    }
    parse_absolute_url(DEFAULT_REDIRECT_URL_ENV, target)
}

fn normalize_prefix(prefix: &str) -> Result<String, ConfigError> {
    let trimmed = prefix.trim().trim_end_matches('/');
    if !prefix.trim().starts_with('/') || trimmed.is_empty() {
        return Err(ConfigError::InvalidManagementPrefix(prefix.to_string()));
    }
    Ok(trimmed.to_string())
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}
