// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process profile store for tests and offline runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::db::ProfileStore;
use crate::error::StoreError;
use crate::models::{Profile, ProfileUpdate};
use crate::time_utils::{Clock, SystemClock};

/// Profile store backed by a concurrent map.
///
/// Cloning shares the underlying documents.
#[derive(Clone)]
pub struct MemoryProfileStore {
    docs: Arc<DashMap<String, Profile>>,
    clock: Arc<dyn Clock>,
    failing: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose server timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: Arc::new(DashMap::new()),
            clock,
            failing: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed or overwrite a document directly.
    pub fn insert(&self, profile: Profile) {
        self.docs.insert(profile.id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of successful create/update writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "Profile store unavailable (injected failure)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, uid: &str) -> Result<Option<Profile>, StoreError> {
        self.check_available()?;
        Ok(self.docs.get(uid).map(|doc| doc.value().clone()))
    }

    async fn create(&self, profile: &Profile) -> Result<(), StoreError> {
        self.check_available()?;
        match self.docs.entry(profile.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(profile.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn update(&self, uid: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        self.check_available()?;
        let mut doc = self
            .docs
            .get_mut(uid)
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
        update.apply_to(doc.value_mut());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn record_login(
        &self,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Profile>, StoreError> {
        self.check_available()?;
        // The shard lock is held across read and write.
        let Some(mut doc) = self.docs.get_mut(uid) else {
            return Ok(None);
        };
        let update = ProfileUpdate::login(at, doc.login_count + 1);
        update.apply_to(doc.value_mut());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(doc.value().clone()))
    }
}
