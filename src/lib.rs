// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session Gate - authenticating reverse proxy
//!
//! Sits in front of an application, turns identity-provider session cookies
//! into short-lived ES256 JWTs and forwards traffic to the upstream.
//!
//! ## Modules
//!
//! - `api` - HTTP surface (management endpoints + proxy fallback)
//! - `auth` - Signing keys, session resolution and token minting
//! - `config` - Environment-driven configuration
//! - `proxy` - Classification, access guard, forwarding and rewriting
//! - `server` - Start-up, serving and graceful shutdown
//! - `tls` - Certificate provisioning for local mode

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod state;
pub mod tls;

#[cfg(test)]
mod testing;
