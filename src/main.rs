// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use session_gate::{
    config::ProxyConfig,
    logging::{self, LogFormat},
    server,
    tls::{CertificateProvisioner, PemFileProvisioner},
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    // Must happen before any TLS configuration is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    logging::init(LogFormat::from_env());

    let config = match ProxyConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let provisioner = config.tls.as_ref().map(|paths| {
        Box::new(PemFileProvisioner::from_paths(paths)) as Box<dyn CertificateProvisioner>
    });

    let shutdown = CancellationToken::new();
    tokio::spawn(server::cancel_on_signal(shutdown.clone()));

    match server::run(config, provisioner, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Proxy failed");
            ExitCode::FAILURE
        }
    }
}
