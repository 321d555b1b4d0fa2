// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider interface and auth-state notification plumbing.
//!
//! Providers publish every identity-state change through an
//! [`AuthStateNotifier`]. Consumers hold a [`Subscription`], an ordered stream
//! of `Option<Principal>` values that starts with the provider's current state
//! once that state is known.

use async_trait::async_trait;
use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::models::{FederatedCredential, Principal, PrincipalChanges};

/// Where the provider keeps an established session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Persistence {
    /// Survives process restarts.
    #[default]
    Local,
    /// Lives only as long as the current session scope.
    Session,
}

impl Persistence {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Persistence::Local
        } else {
            Persistence::Session
        }
    }
}

/// External identity provider.
///
/// Operations other than sign-in, reset and subscription act on the
/// provider's currently signed-in principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str)
        -> Result<Principal, ProviderError>;

    async fn exchange_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError>;

    async fn sign_in_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError>;

    async fn end_session(&self) -> Result<(), ProviderError>;

    async fn send_reset(&self, email: &str) -> Result<(), ProviderError>;

    async fn send_verification(&self) -> Result<(), ProviderError>;

    async fn apply_verification_code(&self, code: &str) -> Result<(), ProviderError>;

    async fn update_profile(&self, changes: &PrincipalChanges)
        -> Result<Principal, ProviderError>;

    async fn update_email(&self, email: &str) -> Result<Principal, ProviderError>;

    async fn update_password(&self, password: &str) -> Result<(), ProviderError>;

    /// Re-fetch the signed-in principal from the provider.
    async fn reload(&self) -> Result<Option<Principal>, ProviderError>;

    async fn link_provider(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError>;

    async fn unlink_provider(&self, provider_id: &str) -> Result<Principal, ProviderError>;

    /// Choose persistence for the next credential exchange.
    async fn set_persistence_mode(&self, mode: Persistence) -> Result<(), ProviderError>;

    /// Register for identity-state changes.
    fn subscribe(&self) -> Subscription;
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification fan-out
// ─────────────────────────────────────────────────────────────────────────────

type Listener = mpsc::UnboundedSender<Option<Principal>>;

struct NotifierState {
    /// `None` until the provider has determined its initial state.
    current: Option<Option<Principal>>,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

struct NotifierInner {
    state: Mutex<NotifierState>,
}

impl NotifierInner {
    fn remove(&self, id: u64) {
        self.state.lock().listeners.remove(&id);
    }
}

/// Ordered fan-out of identity-state changes to any number of subscribers.
#[derive(Clone)]
pub struct AuthStateNotifier {
    inner: Arc<NotifierInner>,
}

impl AuthStateNotifier {
    /// Notifier whose initial state is not yet known.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                state: Mutex::new(NotifierState {
                    current: None,
                    listeners: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Notifier that already knows its initial state.
    pub fn resolved(principal: Option<Principal>) -> Self {
        let notifier = Self::new();
        notifier.publish(principal);
        notifier
    }

    /// Record a state change and deliver it to every subscriber.
    pub fn publish(&self, principal: Option<Principal>) {
        let mut state = self.inner.state.lock();
        state.current = Some(principal.clone());
        // Closed receivers are pruned on the way through.
        state
            .listeners
            .retain(|_, tx| tx.send(principal.clone()).is_ok());
    }

    /// Latest published state, if any has been published.
    pub fn current(&self) -> Option<Option<Principal>> {
        self.inner.state.lock().current.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();

        if let Some(current) = state.current.clone() {
            // Receiver is alive; it is owned by the Subscription below.
            let _ = tx.send(current);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, tx);

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for AuthStateNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration for identity-state changes.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// removes it from the provider.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Option<Principal>>,
    registry: Weak<NotifierInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Next change, if one is already queued.
    pub fn try_next(&mut self) -> Option<Option<Principal>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Option<Principal>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(self.id);
        }
    }
}
