// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token minting: an active [`Session`] becomes a short-lived ES256 JWT.
//!
//! ## Claims
//!
//! | Claim | Value |
//! |-------|-------|
//! | `sub` | identity ID |
//! | `session` | full session document |
//! | `iat` | session `issued_at` |
//! | `exp` | `min(session.expires_at, now + max lifetime)` |
//! | `iss` | public URL of the proxy |
//!
//! The payload is a pure function of session, issuer and clock. ECDSA
//! signatures may still differ between two mints of the same payload.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, SigningKeySet, VerifyError};
use super::session::Session;
use crate::config::ProxyConfig;

/// Token minting errors.
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    #[error("session is not active")]
    InactiveSession,

    #[error("session already expired")]
    SessionExpired,

    #[error(transparent)]
    Signing(#[from] KeyError),
}

/// Claims carried by every minted token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyClaims {
    /// Identity ID
    pub sub: String,
    /// Full session document
    pub session: Session,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A signed token derived from one session. Never cached.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub subject: String,
    pub issued_at: i64,
    pub expires_at: i64,
    /// Compact `header.payload.signature` form
    pub value: String,
}

impl MintedToken {
    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

/// Turns sessions into signed tokens using the process key set.
#[derive(Debug, Clone)]
pub struct TokenMinter {
    keys: Arc<SigningKeySet>,
    issuer: String,
    max_lifetime: Duration,
}

impl TokenMinter {
    pub fn new(keys: Arc<SigningKeySet>, config: &ProxyConfig) -> Self {
        Self {
            keys,
            issuer: config.public_url.as_str().trim_end_matches('/').to_string(),
            max_lifetime: config.token_max_lifetime,
        }
    }

    /// Build the claim set for `session` as of `now`.
    pub fn claims_for(&self, session: &Session, now: DateTime<Utc>) -> Result<ProxyClaims, MintError> {
        if !session.active {
            return Err(MintError::InactiveSession);
        }

        let now_ts = now.timestamp();
        let cap = now_ts.saturating_add(self.max_lifetime.as_secs() as i64);
        let exp = session.expires_at.timestamp().min(cap);
        if exp <= now_ts {
            return Err(MintError::SessionExpired);
        }

        Ok(ProxyClaims {
            sub: session.subject().to_string(),
            session: session.clone(),
            iat: session.issued_at.timestamp(),
            exp,
            iss: self.issuer.clone(),
        })
    }

    /// Mint a token for `session` using the current time.
    pub fn mint(&self, session: &Session) -> Result<MintedToken, MintError> {
        self.mint_at(session, Utc::now())
    }

    /// Mint a token for `session` as of `now`.
    pub fn mint_at(&self, session: &Session, now: DateTime<Utc>) -> Result<MintedToken, MintError> {
        let claims = self.claims_for(session, now)?;
        let value = self.keys.sign(&claims)?;
        Ok(MintedToken {
            subject: claims.sub,
            issued_at: claims.iat,
            expires_at: claims.exp,
            value,
        })
    }

    /// Verify a token minted by this proxy and return its claims.
    pub fn verify(&self, token: &str) -> Result<ProxyClaims, VerifyError> {
        Ok(self.keys.verify::<ProxyClaims>(token)?.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_session, IDENTITY_ID};
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use chrono::TimeZone;

    fn minter_with_lifetime(lifetime: Duration) -> TokenMinter {
        let config = ProxyConfig::builder("http://localhost:3000")
            .public_url("http://localhost:4000")
            .identity_api("http://localhost:4433")
            .token_max_lifetime(lifetime)
            .build()
            .unwrap();
        TokenMinter::new(Arc::new(SigningKeySet::generate().unwrap()), &config)
    }

    fn minter() -> TokenMinter {
        minter_with_lifetime(Duration::from_secs(600))
    }

    #[test]
    fn claims_carry_subject_and_session() {
        let session = sample_session();
        let now = Utc::now();
        let claims = minter().claims_for(&session, now).unwrap();

        assert_eq!(claims.sub, IDENTITY_ID);
        assert_eq!(claims.session, session);
        assert_eq!(claims.iat, session.issued_at.timestamp());
        assert_eq!(claims.iss, "http://localhost:4000");
    }

    #[test]
    fn expiry_is_capped_by_max_lifetime() {
        let session = sample_session();
        let now = Utc::now();
        let claims = minter_with_lifetime(Duration::from_secs(300))
            .claims_for(&session, now)
            .unwrap();
        assert_eq!(claims.exp, now.timestamp() + 300);
    }

    #[test]
    fn expiry_follows_session_when_sooner() {
        let mut session = sample_session();
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        session.expires_at = now + chrono::Duration::seconds(30);

        let claims = minter().claims_for(&session, now).unwrap();
        assert_eq!(claims.exp, session.expires_at.timestamp());
    }

    #[test]
    fn inactive_or_expired_sessions_are_rejected() {
        let mut session = sample_session();
        session.active = false;
        assert!(matches!(
            minter().claims_for(&session, Utc::now()),
            Err(MintError::InactiveSession)
        ));

        let mut session = sample_session();
        let now = Utc::now();
        session.expires_at = now - chrono::Duration::seconds(1);
        assert!(matches!(
            minter().claims_for(&session, now),
            Err(MintError::SessionExpired)
        ));
    }

    #[test]
    fn payload_is_deterministic_for_same_inputs() {
        let minter = minter();
        let session = sample_session();
        let now = Utc::now();

        let a = minter.mint_at(&session, now).unwrap();
        let b = minter.mint_at(&session, now).unwrap();

        let head_a: Vec<&str> = a.value.split('.').take(2).collect();
        let head_b: Vec<&str> = b.value.split('.').take(2).collect();
        assert_eq!(head_a, head_b);
        assert!(minter.verify(&a.value).is_ok());
        assert!(minter.verify(&b.value).is_ok());
    }

    #[test]
    fn minted_token_verifies_with_published_key() {
        let minter = minter();
        let token = minter.mint(&sample_session()).unwrap();
        assert_eq!(token.subject, IDENTITY_ID);
        assert!(token.bearer().starts_with("Bearer "));

        let claims = minter.verify(&token.value).unwrap();
        assert_eq!(claims.sub, IDENTITY_ID);
        assert_eq!(claims.session.identity.traits["email"], "foo@bar");
    }

    #[test]
    fn wire_format_matches_documented_claims() {
        let token = minter().mint(&sample_session()).unwrap();
        let parts: Vec<&str> = token.value.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "ES256");
        assert!(header["kid"].is_string());

        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(payload["sub"], IDENTITY_ID);
        let session = &payload["session"];
        for field in ["id", "active", "expires_at", "authenticated_at", "issued_at"] {
            assert!(session.get(field).is_some(), "missing session.{field}");
        }
        for field in ["id", "schema_id", "schema_url", "traits"] {
            assert!(
                session["identity"].get(field).is_some(),
                "missing session.identity.{field}"
            );
        }
    }

    #[test]
    fn altering_payload_breaks_verification() {
        let minter = minter();
        let token = minter.mint(&sample_session()).unwrap();
        let parts: Vec<&str> = token.value.split('.').collect();

        let mut payload = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        for index in [0, payload.len() / 2, payload.len() - 1] {
            let original = payload[index];
            payload[index] ^= 0x01;
            let forged = format!(
                "{}.{}.{}",
                parts[0],
                URL_SAFE_NO_PAD.encode(&payload),
                parts[2]
            );
            assert!(minter.verify(&forged).is_err(), "byte {index} was not covered");
            payload[index] = original;
        }
    }

    #[test]
    fn altering_signature_breaks_verification() {
        let minter = minter();
        let token = minter.mint(&sample_session()).unwrap();
        let parts: Vec<&str> = token.value.split('.').collect();

        let mut signature = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        signature[10] ^= 0xff;
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            parts[1],
            URL_SAFE_NO_PAD.encode(&signature)
        );
        assert!(matches!(
            minter.verify(&forged),
            Err(VerifyError::InvalidSignature)
        ));
    }
}
