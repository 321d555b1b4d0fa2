// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, TimeZone, Utc};
use session_telemetry::db::{FirestoreProfileStore, MemoryProfileStore};
use session_telemetry::services::{
    InMemoryIdentityProvider, NoopSink, ProfileSynchronizer, SessionCoordinator, SyncStrategy,
    TelemetryAggregator,
};
use session_telemetry::time_utils::ManualClock;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test profile store connection.
#[allow(dead_code)]
pub async fn test_store() -> FirestoreProfileStore {
    FirestoreProfileStore::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed starting instant for clock-driven tests.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Coordinator wired to in-memory collaborators.
#[allow(dead_code)]
pub struct TestSession {
    pub provider: Arc<InMemoryIdentityProvider>,
    pub store: MemoryProfileStore,
    pub clock: ManualClock,
    pub coordinator: SessionCoordinator,
}

#[allow(dead_code)]
pub fn test_session() -> TestSession {
    test_session_with(InMemoryIdentityProvider::new(), SyncStrategy::ReadModifyWrite)
}

#[allow(dead_code)]
pub fn test_session_with(provider: InMemoryIdentityProvider, strategy: SyncStrategy) -> TestSession {
    let provider = Arc::new(provider);
    let clock = ManualClock::new(t0());
    let store = MemoryProfileStore::with_clock(Arc::new(clock.clone()));
    let synchronizer = ProfileSynchronizer::new(Arc::new(store.clone()), strategy);
    let coordinator = SessionCoordinator::new(provider.clone(), synchronizer);

    TestSession {
        provider,
        store,
        clock,
        coordinator,
    }
}

/// Telemetry aggregator on a manual clock with a no-op sink.
#[allow(dead_code)]
pub fn test_telemetry() -> (TelemetryAggregator, ManualClock) {
    let clock = ManualClock::new(t0());
    let telemetry = TelemetryAggregator::with_clock(Arc::new(NoopSink), Arc::new(clock.clone()));
    (telemetry, clock)
}

/// Let the notification pump drain queued notifications.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
