// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile store layer (Firestore, in-memory).

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreProfileStore;
pub use self::memory::MemoryProfileStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Profile, ProfileUpdate};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
}

/// Keyed document store holding one [`Profile`] per principal uid.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Read a profile. `Ok(None)` if no document exists.
    async fn get(&self, uid: &str) -> Result<Option<Profile>, StoreError>;

    /// Create a new profile document. Fails if one already exists.
    async fn create(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Partially update an existing profile document.
    ///
    /// Fails with [`StoreError::NotFound`] if no document exists.
    async fn update(&self, uid: &str, update: &ProfileUpdate) -> Result<(), StoreError>;

    /// Timestamp the store records for writes issued now.
    ///
    /// Stores that stamp `createdAt`/`lastLoginAt` themselves treat the
    /// timestamps in written values as placeholders; this is then only an
    /// approximation of what gets stored.
    fn server_timestamp(&self) -> DateTime<Utc>;

    /// Atomically bump `loginCount` and set `lastLoginAt` on an existing
    /// profile, returning the updated document, or `None` if absent.
    async fn record_login(
        &self,
        _uid: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<Profile>, StoreError> {
        Err(StoreError::Unsupported("record_login"))
    }
}
