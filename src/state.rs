// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{SessionResolver, SigningKeySet, TokenMinter};
use crate::config::ProxyConfig;
use crate::error::StartupError;
use crate::proxy::forward::{Forwarder, DEFAULT_CONNECT_TIMEOUT};
use crate::proxy::rewrite::RewriteRules;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub keys: Arc<SigningKeySet>,
    pub resolver: SessionResolver,
    pub minter: TokenMinter,
    pub forwarder: Forwarder,
    pub upstream_rules: Arc<RewriteRules>,
    pub identity_rules: Arc<RewriteRules>,
}

impl AppState {
    pub fn new(config: ProxyConfig, keys: SigningKeySet) -> Result<Self, StartupError> {
        let keys = Arc::new(keys);
        let resolver = SessionResolver::new(&config)?;
        let minter = TokenMinter::new(keys.clone(), &config);
        let forwarder = Forwarder::new(DEFAULT_CONNECT_TIMEOUT)?;

        Ok(Self {
            upstream_rules: Arc::new(RewriteRules::for_upstream(&config)),
            identity_rules: Arc::new(RewriteRules::for_identity_api(&config)),
            config: Arc::new(config),
            keys,
            resolver,
            minter,
            forwarder,
        })
    }
}
