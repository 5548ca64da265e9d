// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TLS material for local mode.
//!
//! In local mode the proxy terminates TLS itself. Certificates come from a
//! [`CertificateProvisioner`]; the bundled [`PemFileProvisioner`] reads a PEM
//! chain and PEM private key from disk. Any provisioning failure is fatal at
//! start-up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};

use crate::config::TlsPaths;

#[derive(Debug, thiserror::Error)]
pub enum TlsProvisionError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid PEM: {reason}", path.display())]
    InvalidPem { path: PathBuf, reason: String },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no supported private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Certificate chain and matching private key.
#[derive(Debug)]
pub struct TlsMaterial {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Source of serving certificates for a public host name.
pub trait CertificateProvisioner: Send + Sync {
    fn provision(&self, hostname: &str) -> Result<TlsMaterial, TlsProvisionError>;
}

/// Reads a certificate chain and key from PEM files.
#[derive(Debug, Clone)]
pub struct PemFileProvisioner {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl PemFileProvisioner {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn from_paths(paths: &TlsPaths) -> Self {
        Self::new(&paths.cert, &paths.key)
    }
}

impl CertificateProvisioner for PemFileProvisioner {
    fn provision(&self, hostname: &str) -> Result<TlsMaterial, TlsProvisionError> {
        let certs: Vec<CertificateDer<'static>> = read_pem(&self.cert_path)?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| CertificateDer::from(block.into_contents()))
            .collect();
        if certs.is_empty() {
            return Err(TlsProvisionError::NoCertificates(self.cert_path.clone()));
        }

        let key = read_pem(&self.key_path)?
            .into_iter()
            .find_map(|block| match block.tag() {
                "PRIVATE KEY" => Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    block.into_contents(),
                ))),
                "RSA PRIVATE KEY" => Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                    block.into_contents(),
                ))),
                "EC PRIVATE KEY" => Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
                    block.into_contents(),
                ))),
                _ => None,
            })
            .ok_or_else(|| TlsProvisionError::NoPrivateKey(self.key_path.clone()))?;

        tracing::info!(
            hostname,
            cert = %self.cert_path.display(),
            chain_len = certs.len(),
            "Loaded TLS certificate"
        );
        Ok(TlsMaterial { certs, key })
    }
}

fn read_pem(path: &Path) -> Result<Vec<pem::Pem>, TlsProvisionError> {
    let contents = std::fs::read(path).map_err(|source| TlsProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    pem::parse_many(contents).map_err(|e| TlsProvisionError::InvalidPem {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Build a rustls server configuration on the ring provider.
pub fn server_config(material: TlsMaterial) -> Result<rustls::ServerConfig, TlsProvisionError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(material.certs, material.key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
