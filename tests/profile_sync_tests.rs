// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile reconciliation against the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use session_telemetry::db::{MemoryProfileStore, ProfileStore};
use session_telemetry::error::StoreError;
use session_telemetry::models::{Principal, Profile, ProfileUpdate};
use session_telemetry::services::{ProfileSynchronizer, SyncStrategy};
use session_telemetry::time_utils::ManualClock;
use std::sync::Arc;

mod common;
use common::t0;

fn principal(uid: &str) -> Principal {
    Principal {
        uid: uid.to_string(),
        email: Some(format!("{}@example.com", uid)),
        email_verified: true,
        display_name: Some("Test User".to_string()),
        photo_url: None,
        provider_ids: vec!["google.com".to_string()],
    }
}

fn setup(strategy: SyncStrategy) -> (ProfileSynchronizer, MemoryProfileStore, ManualClock) {
    let clock = ManualClock::new(t0());
    let store = MemoryProfileStore::with_clock(Arc::new(clock.clone()));
    let sync = ProfileSynchronizer::new(Arc::new(store.clone()), strategy);
    (sync, store, clock)
}

/// Delegates to a memory store but has no atomic increment.
struct PlainStore(MemoryProfileStore);

#[async_trait]
impl ProfileStore for PlainStore {
    async fn get(&self, uid: &str) -> Result<Option<Profile>, StoreError> {
        self.0.get(uid).await
    }

    async fn create(&self, profile: &Profile) -> Result<(), StoreError> {
        self.0.create(profile).await
    }

    async fn update(&self, uid: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        self.0.update(uid, update).await
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.0.server_timestamp()
    }
}

#[tokio::test]
async fn test_first_authentication_creates_profile() {
    let (sync, store, _clock) = setup(SyncStrategy::ReadModifyWrite);

    let profile = sync
        .sync_on_authentication(&principal("u1"))
        .await
        .expect("Profile should be created");

    assert_eq!(profile.id, "u1");
    assert_eq!(profile.email, "u1@example.com");
    assert_eq!(profile.display_name.as_deref(), Some("Test User"));
    assert!(profile.email_verified);
    assert_eq!(profile.provider, "google.com");
    assert_eq!(profile.login_count, 1);
    assert_eq!(profile.created_at, t0());
    assert_eq!(profile.created_at, profile.last_login_at);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_subsequent_authentications_increment_by_one() {
    let (sync, store, clock) = setup(SyncStrategy::ReadModifyWrite);
    let p = principal("u1");
    sync.sync_on_authentication(&p).await.unwrap();

    clock.advance(Duration::minutes(30));
    let second = sync.sync_on_authentication(&p).await.unwrap();
    clock.advance(Duration::minutes(30));
    let third = sync.sync_on_authentication(&p).await.unwrap();

    assert_eq!(second.login_count, 2);
    assert_eq!(third.login_count, 3);
    assert_eq!(third.created_at, t0());
    assert_eq!(third.last_login_at, t0() + Duration::hours(1));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_missing_login_count_defaults_to_zero() {
    let (sync, store, _clock) = setup(SyncStrategy::ReadModifyWrite);
    let p = principal("legacy");

    let mut legacy = Profile::from_principal(&p, t0() - Duration::days(30));
    legacy.login_count = 0;
    store.insert(legacy);

    let profile = sync.sync_on_authentication(&p).await.unwrap();
    assert_eq!(profile.login_count, 1);
    assert_eq!(profile.created_at, t0() - Duration::days(30));
    assert_eq!(profile.last_login_at, t0());
}

#[tokio::test]
async fn test_store_failure_is_absorbed_once() {
    let (sync, store, _clock) = setup(SyncStrategy::ReadModifyWrite);
    store.set_failing(true);

    assert!(sync.sync_on_authentication(&principal("u1")).await.is_none());
    assert_eq!(sync.absorbed_failures(), 1);

    // Plain reads are reported as absent but not counted as sync failures.
    assert!(sync.fetch("u1").await.is_none());
    assert_eq!(sync.absorbed_failures(), 1);
}

#[tokio::test]
async fn test_try_sync_reports_failure() {
    let (sync, store, _clock) = setup(SyncStrategy::ReadModifyWrite);
    store.set_failing(true);

    let err = sync.try_sync(&principal("u1")).await.unwrap_err();
    assert_eq!(err.uid, "u1");
    assert!(matches!(err.source, StoreError::Database(_)));
    assert_eq!(sync.absorbed_failures(), 0);
}

#[tokio::test]
async fn test_atomic_strategy_falls_back_without_store_support() {
    let clock = ManualClock::new(t0());
    let inner = MemoryProfileStore::with_clock(Arc::new(clock));
    let sync = ProfileSynchronizer::new(Arc::new(PlainStore(inner)), SyncStrategy::Atomic);
    let p = principal("u1");

    sync.sync_on_authentication(&p).await.unwrap();
    let second = sync.sync_on_authentication(&p).await.unwrap();

    assert_eq!(second.login_count, 2);
    assert_eq!(sync.absorbed_failures(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_atomic_strategy_counts_concurrent_logins() {
    const CONCURRENT_LOGINS: u64 = 16;

    let (sync, store, _clock) = setup(SyncStrategy::Atomic);
    let sync = Arc::new(sync);
    let p = principal("busy");
    sync.sync_on_authentication(&p).await.unwrap();

    let mut handles = vec![];
    for _ in 0..CONCURRENT_LOGINS {
        let sync = sync.clone();
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            sync.sync_on_authentication(&p).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    let stored = store.get("busy").await.unwrap().unwrap();
    assert_eq!(stored.login_count, CONCURRENT_LOGINS + 1);
}
