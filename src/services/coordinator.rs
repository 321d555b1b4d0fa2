// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity state coordination.
//!
//! [`SessionCoordinator`] owns the current principal, the mirrored profile
//! and the loading flag. State changes come from two places:
//!
//! 1. Provider notifications, applied in order by a background pump task
//! 2. The coordinator's own operations (login, link, ...) once they succeed
//!
//! Consumers observe a single [`SessionSnapshot`] through a `watch` channel
//! so principal, profile and loading are always read together.

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AuthError, Result};
use crate::models::{FederatedCredential, Principal, PrincipalChanges, Profile};
use crate::services::identity::{IdentityProvider, Subscription};
use crate::services::persistence::SessionPersistencePolicy;
use crate::services::profile_sync::ProfileSynchronizer;

/// Identity state as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "principal", rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum AuthState {
    /// No provider notification has arrived yet.
    Unresolved,
    Anonymous,
    Authenticated(Principal),
}

impl AuthState {
    fn from_notification(principal: Option<Principal>) -> Self {
        match principal {
            Some(p) => AuthState::Authenticated(p),
            None => AuthState::Anonymous,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AuthState::Authenticated(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, AuthState::Unresolved)
    }
}

/// Everything a consumer renders from, read atomically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionSnapshot {
    pub state: AuthState,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: AuthState::Unresolved,
            profile: None,
            loading: true,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.state.principal()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

/// State shared between the coordinator and its notification pump.
struct Shared {
    tx: watch::Sender<SessionSnapshot>,
    in_flight: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::initial());
        Self {
            tx,
            in_flight: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    fn current_principal(&self) -> Option<Principal> {
        self.tx.borrow().principal().cloned()
    }

    /// Apply a mutation and recompute `loading`; subscribers are woken only
    /// if something changed.
    fn modify(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        let busy = self.in_flight.load(Ordering::SeqCst) > 0;
        self.tx.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            f(snapshot);
            snapshot.loading = busy || !snapshot.state.is_resolved();
            *snapshot != before
        });
    }

    /// Replace the principal. A profile belonging to someone else is dropped.
    fn set_principal(&self, principal: Option<Principal>) {
        self.modify(|snapshot| {
            let keep_profile = match (&principal, &snapshot.profile) {
                (Some(p), Some(profile)) => profile.id == p.uid,
                _ => false,
            };
            if !keep_profile {
                snapshot.profile = None;
            }
            snapshot.state = AuthState::from_notification(principal);
        });
    }

    /// Install `profile` only if `uid` is still the current principal.
    fn set_profile_if_current(&self, uid: &str, profile: Option<Profile>) {
        let Some(profile) = profile else {
            return;
        };
        self.modify(|snapshot| {
            if snapshot.principal().is_some_and(|p| p.uid == uid) {
                snapshot.profile = Some(profile);
            }
        });
    }

    fn begin(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.modify(|_| {});
        InFlight { shared: self }
    }
}

/// Keeps `loading` set while an identity-state-changing call runs.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.modify(|_| {});
    }
}

/// Apply provider notifications in the order they were emitted.
async fn pump_notifications(
    shared: Arc<Shared>,
    synchronizer: Arc<ProfileSynchronizer>,
    mut subscription: Subscription,
) {
    while let Some(principal) = subscription.next().await {
        let _busy = shared.begin();
        tracing::debug!(
            uid = principal.as_ref().map(|p| p.uid.as_str()),
            "Identity state changed"
        );

        shared.set_principal(principal.clone());
        if let Some(principal) = principal {
            let profile = synchronizer.fetch(&principal.uid).await;
            shared.set_profile_if_current(&principal.uid, profile);
        }
    }
    tracing::debug!("Identity notification stream ended");
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks identity state and orchestrates identity operations.
///
/// Must be created inside a tokio runtime: construction subscribes to the
/// provider and spawns the notification pump. Overlapping signup/login calls
/// are not serialized; issuing them concurrently is the caller's problem.
pub struct SessionCoordinator {
    provider: Arc<dyn IdentityProvider>,
    persistence: SessionPersistencePolicy,
    synchronizer: Arc<ProfileSynchronizer>,
    shared: Arc<Shared>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(provider: Arc<dyn IdentityProvider>, synchronizer: ProfileSynchronizer) -> Self {
        let shared = Arc::new(Shared::new());
        let synchronizer = Arc::new(synchronizer);

        let subscription = provider.subscribe();
        let pump = tokio::spawn(pump_notifications(
            shared.clone(),
            synchronizer.clone(),
            subscription,
        ));

        Self {
            persistence: SessionPersistencePolicy::new(provider.clone()),
            provider,
            synchronizer,
            shared,
            pump: parking_lot::Mutex::new(Some(pump)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observable state
    // ─────────────────────────────────────────────────────────────────────

    pub fn current_principal(&self) -> Option<Principal> {
        self.shared.current_principal()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.shared.tx.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.tx.borrow().loading
    }

    pub fn state(&self) -> AuthState {
        self.shared.tx.borrow().state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Receiver that observes every snapshot change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Wait for the provider's first notification.
    pub async fn wait_until_resolved(&self) -> SessionSnapshot {
        let mut rx = self.watch();
        let resolved = rx
            .wait_for(|s| s.state.is_resolved())
            .await
            .map(|snapshot| snapshot.clone());
        match resolved {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }

    pub fn synchronizer(&self) -> &ProfileSynchronizer {
        &self.synchronizer
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sign-in / sign-out
    // ─────────────────────────────────────────────────────────────────────

    /// Create an account, optionally name it, send the verification email,
    /// then reconcile the profile.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Principal> {
        let _busy = self.shared.begin();

        let mut principal = self.provider.create_account(email, password).await?;
        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            principal = self
                .provider
                .update_profile(&PrincipalChanges::display_name(name))
                .await?;
        }
        self.provider.send_verification().await?;

        tracing::info!(uid = %principal.uid, "Account created");
        self.authenticated(principal).await
    }

    /// Select persistence, exchange credentials, reconcile the profile.
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> Result<Principal> {
        let _busy = self.shared.begin();

        self.persistence.select(remember).await?;
        let principal = self.provider.exchange_credentials(email, password).await?;

        tracing::info!(uid = %principal.uid, remember, "Logged in");
        self.authenticated(principal).await
    }

    /// Sign in with a federated credential; otherwise behaves like [`Self::login`].
    pub async fn sign_in_federated(
        &self,
        credential: &FederatedCredential,
        remember: bool,
    ) -> Result<Principal> {
        let _busy = self.shared.begin();

        self.persistence.select(remember).await?;
        let principal = self.provider.sign_in_federated(credential).await?;

        tracing::info!(
            uid = %principal.uid,
            provider = credential.kind.provider_id(),
            "Logged in with federated credential"
        );
        self.authenticated(principal).await
    }

    /// End the session with the provider and drop the cached profile.
    pub async fn logout(&self) -> Result<()> {
        let _busy = self.shared.begin();

        self.provider
            .end_session()
            .await
            .map_err(AuthError::session)?;
        self.shared.set_principal(None);

        tracing::info!("Logged out");
        Ok(())
    }

    async fn authenticated(&self, principal: Principal) -> Result<Principal> {
        self.shared.set_principal(Some(principal.clone()));
        let profile = self.synchronizer.sync_on_authentication(&principal).await;
        self.shared.set_profile_if_current(&principal.uid, profile);
        Ok(principal)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Account maintenance
    // ─────────────────────────────────────────────────────────────────────

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        self.provider.send_reset(email).await?;
        tracing::info!("Password reset email sent");
        Ok(())
    }

    pub async fn send_verification_email(&self) -> Result<()> {
        let principal = self.require_principal()?;
        self.provider.send_verification().await?;
        tracing::info!(uid = %principal.uid, "Verification email sent");
        Ok(())
    }

    /// Apply a verification code, then reload the principal and profile.
    pub async fn verify_email(&self, code: &str) -> Result<()> {
        self.require_principal()?;
        let _busy = self.shared.begin();

        self.provider.apply_verification_code(code).await?;
        if let Some(principal) = self.provider.reload().await? {
            self.shared.set_principal(Some(principal));
        }
        self.refresh_profile().await;
        Ok(())
    }

    pub async fn update_email(&self, email: &str) -> Result<()> {
        self.require_principal()?;
        let _busy = self.shared.begin();

        let principal = self.provider.update_email(email).await?;
        self.replace_principal(principal).await;
        Ok(())
    }

    pub async fn update_password(&self, password: &str) -> Result<()> {
        let principal = self.require_principal()?;
        self.provider.update_password(password).await?;
        tracing::info!(uid = %principal.uid, "Password updated");
        Ok(())
    }

    pub async fn update_display_name(&self, name: &str) -> Result<()> {
        self.update_principal(PrincipalChanges::display_name(name))
            .await
    }

    pub async fn update_photo_url(&self, url: &str) -> Result<()> {
        self.update_principal(PrincipalChanges::photo_url(url)).await
    }

    async fn update_principal(&self, changes: PrincipalChanges) -> Result<()> {
        self.require_principal()?;
        let _busy = self.shared.begin();

        let principal = self.provider.update_profile(&changes).await?;
        self.replace_principal(principal).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Provider linking
    // ─────────────────────────────────────────────────────────────────────

    pub async fn link_provider(&self, credential: &FederatedCredential) -> Result<Principal> {
        self.require_principal()?;
        let _busy = self.shared.begin();

        let principal = self.provider.link_provider(credential).await?;
        tracing::info!(
            uid = %principal.uid,
            provider = credential.kind.provider_id(),
            "Provider linked"
        );
        self.replace_principal(principal.clone()).await;
        Ok(principal)
    }

    pub async fn unlink_provider(&self, provider_id: &str) -> Result<()> {
        self.require_principal()?;
        let _busy = self.shared.begin();

        let principal = self.provider.unlink_provider(provider_id).await?;
        tracing::info!(uid = %principal.uid, provider = provider_id, "Provider unlinked");
        self.replace_principal(principal).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Profile cache
    // ─────────────────────────────────────────────────────────────────────

    /// Re-read the profile document and replace the local cache.
    pub async fn refresh_profile(&self) {
        let Some(principal) = self.current_principal() else {
            self.shared.modify(|s| s.profile = None);
            return;
        };
        let profile = self.synchronizer.fetch(&principal.uid).await;
        self.shared.set_profile_if_current(&principal.uid, profile);
    }

    async fn replace_principal(&self, principal: Principal) {
        self.shared.set_principal(Some(principal));
        self.refresh_profile().await;
    }

    fn require_principal(&self) -> Result<Principal> {
        self.current_principal().ok_or(AuthError::NotAuthenticated)
    }

    /// Stop applying provider notifications and release the subscription.
    pub fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            tracing::debug!("Session coordinator shut down");
        }
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
