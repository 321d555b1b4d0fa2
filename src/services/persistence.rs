// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session durability policy ("remember me").
//!
//! Providers bind the persistence mode to a session at credential-exchange
//! time, so [`SessionPersistencePolicy::select`] must complete before the
//! exchange it is meant to affect. Selecting afterwards changes nothing for
//! the session already established.

use std::sync::Arc;

use crate::error::Result;
use crate::services::identity::{IdentityProvider, Persistence};

pub struct SessionPersistencePolicy {
    provider: Arc<dyn IdentityProvider>,
}

impl SessionPersistencePolicy {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Choose durable (`remember`) or session-scoped persistence for the next
    /// credential exchange.
    pub async fn select(&self, remember: bool) -> Result<Persistence> {
        let mode = Persistence::from_remember(remember);
        self.provider.set_persistence_mode(mode).await?;
        tracing::debug!(?mode, "Session persistence selected");
        Ok(mode)
    }
}
