// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Start-up and serving.
//!
//! Start-up order: signing keys, TLS material (when configured), shared
//! state, listener. Any failure before the listener opens is returned as a
//! [`StartupError`] and the process exits non-zero.
//!
//! Shutdown is driven by a [`CancellationToken`]. Once cancelled the server
//! stops accepting connections and gives in-flight requests up to the
//! configured grace period.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api;
use crate::auth::SigningKeySet;
use crate::config::{ConfigError, DeploymentMode, ProxyConfig};
use crate::error::StartupError;
use crate::state::AppState;
use crate::tls::{self, CertificateProvisioner};

/// Run the proxy until `shutdown` is cancelled.
pub async fn run(
    config: ProxyConfig,
    provisioner: Option<Box<dyn CertificateProvisioner>>,
    shutdown: CancellationToken,
) -> Result<(), StartupError> {
    let addr = resolve_bind_addr(&config).await?;

    let keys = SigningKeySet::from_config(&config)?;
    info!(
        kid = keys.key_id(),
        persistent = config.signing_key_path.is_some(),
        "Signing key ready"
    );

    let tls = match (config.mode, provisioner) {
        (_, Some(provisioner)) => {
            let material = provisioner.provision(config.public_host())?;
            Some(tls::server_config(material)?)
        }
        (DeploymentMode::Local, None) => return Err(ConfigError::MissingTlsMaterial.into()),
        (DeploymentMode::Production, None) => None,
    };

    info!(
        %addr,
        mode = %config.mode,
        tls = tls.is_some(),
        upstream = %config.upstream,
        public_url = %config.public_url,
        identity_api = %config.identity_api,
        protected_patterns = config.protected_paths.len(),
        issue_tokens = config.issue_tokens,
        "Proxy listening"
    );

    let grace = config.shutdown_grace;
    let app = api::router(AppState::new(config, keys)?);

    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            info!(grace_secs = grace.as_secs(), "Shutting down, draining connections");
            handle.graceful_shutdown(Some(grace));
        }
    });

    serve(app, addr, tls, handle).await?;
    info!("Proxy stopped");
    Ok(())
}

/// Serve `app` on `addr`, over TLS when `tls` is set.
pub async fn serve(
    app: Router,
    addr: SocketAddr,
    tls: Option<rustls::ServerConfig>,
    handle: Handle<SocketAddr>,
) -> std::io::Result<()> {
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match tls {
        Some(config) => {
            axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(config)))
                .handle(handle)
                .serve(service)
                .await
        }
        None => axum_server::bind(addr).handle(handle).serve(service).await,
    }
}

async fn resolve_bind_addr(config: &ProxyConfig) -> Result<SocketAddr, StartupError> {
    let bind = config.bind_addr();
    let invalid = |reason: String| StartupError::ListenAddr {
        addr: bind.clone(),
        reason,
    };
    let mut addrs = tokio::net::lookup_host(bind.as_str())
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| invalid("no addresses found".to_string()))?;
    Ok(addr)
}

/// Cancel `token` on SIGINT or SIGTERM.
pub async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
        () = token.cancelled() => return,
    }
    token.cancel();
}
