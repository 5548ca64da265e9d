// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Turns identity-provider sessions into tokens the upstream application can
//! verify on its own.
//!
//! ## Auth Flow
//!
//! 1. Browser sends the identity-provider session cookie to the proxy
//! 2. Proxy:
//!    - Calls the identity API `whoami` endpoint with that cookie
//!    - Mints an ES256 JWT:
//!      - `sub` → identity ID
//!      - `session` → full session document
//! 3. Upstream receives `Authorization: Bearer <token>` and verifies it
//!    against `<management-prefix>/jwks.json`
//!
//! ## Security
//!
//! - Client-supplied `Authorization` headers are never forwarded
//! - The signing key never leaves the process
//! - Tokens are minted per request and never cached

pub mod keys;
pub mod session;
pub mod token;

pub use keys::{KeyError, SigningKeySet, VerifyError};
pub use session::{Identity, ResolverError, Session, SessionResolver};
pub use token::{MintError, MintedToken, ProxyClaims, TokenMinter};
