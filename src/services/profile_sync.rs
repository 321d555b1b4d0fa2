// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile reconciliation on authentication.
//!
//! Handles:
//! 1. Read the profile keyed by the principal's uid
//! 2. Create it with `loginCount = 1` if absent
//! 3. Otherwise bump `lastLoginAt` and `loginCount`
//! 4. Re-read the stored document for the local cache
//!
//! The default strategy is a plain read-modify-write. Two concurrent
//! authentications of the same principal can both read the same count and
//! under-count by one; callers accept that in exchange for never failing an
//! authentication over a profile write.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::ProfileStore;
use crate::error::{ProfileSyncError, StoreError};
use crate::models::{Principal, Profile, ProfileUpdate};

/// How the login counter is advanced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Get, then update with `stored + 1`.
    #[default]
    ReadModifyWrite,
    /// Let the store increment in one step, falling back to
    /// read-modify-write if the store cannot.
    Atomic,
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-modify-write" | "rmw" => Ok(SyncStrategy::ReadModifyWrite),
            "atomic" => Ok(SyncStrategy::Atomic),
            other => Err(format!("unknown profile sync strategy: {}", other)),
        }
    }
}

/// Reconciles the mirrored [`Profile`] against the profile store.
pub struct ProfileSynchronizer {
    store: Arc<dyn ProfileStore>,
    strategy: SyncStrategy,
    absorbed_failures: AtomicU64,
}

impl ProfileSynchronizer {
    pub fn new(store: Arc<dyn ProfileStore>, strategy: SyncStrategy) -> Self {
        Self {
            store,
            strategy,
            absorbed_failures: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// Number of sync failures logged and swallowed so far.
    pub fn absorbed_failures(&self) -> u64 {
        self.absorbed_failures.load(Ordering::SeqCst)
    }

    /// Reconcile after a successful authentication.
    ///
    /// Never fails: errors are logged once and counted, and `None` is
    /// returned in place of the profile.
    pub async fn sync_on_authentication(&self, principal: &Principal) -> Option<Profile> {
        match self.try_sync(principal).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                self.absorb(&err);
                None
            }
        }
    }

    /// Reconcile and report failures to the caller.
    pub async fn try_sync(&self, principal: &Principal) -> Result<Profile, ProfileSyncError> {
        let result = match self.strategy {
            SyncStrategy::ReadModifyWrite => self.read_modify_write(principal).await,
            SyncStrategy::Atomic => self.atomic(principal).await,
        };

        result.map_err(|source| ProfileSyncError {
            uid: principal.uid.clone(),
            source,
        })
    }

    /// Read the stored profile for `uid`.
    ///
    /// Read failures are logged and reported as `None`; they do not count
    /// towards [`Self::absorbed_failures`].
    pub async fn fetch(&self, uid: &str) -> Option<Profile> {
        match self.store.get(uid).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(uid, error = %e, "Error refreshing user profile");
                None
            }
        }
    }

    fn absorb(&self, err: &ProfileSyncError) {
        self.absorbed_failures.fetch_add(1, Ordering::SeqCst);
        tracing::error!(uid = %err.uid, error = %err.source, "Error tracking user login");
    }

    async fn read_modify_write(&self, principal: &Principal) -> Result<Profile, StoreError> {
        let uid = principal.uid.as_str();
        let now = self.store.server_timestamp();

        let written = match self.store.get(uid).await? {
            Some(existing) => {
                let update = ProfileUpdate::login(now, existing.login_count + 1);
                self.store.update(uid, &update).await?;

                let mut profile = existing;
                update.apply_to(&mut profile);
                tracing::info!(uid, login_count = profile.login_count, "Login recorded");
                profile
            }
            None => self.create(principal, now).await?,
        };

        Ok(self.reload(uid, written).await)
    }

    async fn atomic(&self, principal: &Principal) -> Result<Profile, StoreError> {
        let uid = principal.uid.as_str();
        let now = self.store.server_timestamp();

        match self.store.record_login(uid, now).await {
            Ok(Some(profile)) => {
                tracing::info!(uid, login_count = profile.login_count, "Login recorded");
                Ok(profile)
            }
            Ok(None) => match self.create(principal, now).await {
                Ok(profile) => Ok(self.reload(uid, profile).await),
                // Another writer created it first; count this login on top.
                Err(StoreError::AlreadyExists(_)) => self
                    .store
                    .record_login(uid, now)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(uid.to_string())),
                Err(e) => Err(e),
            },
            Err(StoreError::Unsupported(op)) => {
                tracing::warn!(op, "Store has no atomic increment, using read-modify-write");
                self.read_modify_write(principal).await
            }
            Err(e) => Err(e),
        }
    }

    async fn create(
        &self,
        principal: &Principal,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Profile, StoreError> {
        let profile = Profile::from_principal(principal, now);
        self.store.create(&profile).await?;
        tracing::info!(
            uid = %profile.id,
            provider = %profile.provider,
            "Profile created"
        );
        Ok(profile)
    }

    /// Prefer the stored copy; fall back to what was just written.
    async fn reload(&self, uid: &str, written: Profile) -> Profile {
        self.fetch(uid).await.unwrap_or(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_config_values() {
        assert_eq!(
            "read-modify-write".parse::<SyncStrategy>(),
            Ok(SyncStrategy::ReadModifyWrite)
        );
        assert_eq!(" ATOMIC ".parse::<SyncStrategy>(), Ok(SyncStrategy::Atomic));
        assert!("eventual".parse::<SyncStrategy>().is_err());
    }
}
