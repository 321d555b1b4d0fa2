// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session and telemetry logic.

pub mod coordinator;
pub mod identity;
pub mod identity_toolkit;
pub mod memory_identity;
pub mod metrics;
pub mod persistence;
pub mod profile_sync;
pub mod telemetry;

pub use coordinator::{AuthState, SessionCoordinator, SessionSnapshot};
pub use identity::{AuthStateNotifier, IdentityProvider, Persistence, Subscription};
pub use identity_toolkit::IdentityToolkitProvider;
pub use memory_identity::InMemoryIdentityProvider;
pub use metrics::{MeasurementProtocolSink, MetricsSink, NoopSink, TracingSink};
pub use persistence::SessionPersistencePolicy;
pub use profile_sync::{ProfileSynchronizer, SyncStrategy};
pub use telemetry::TelemetryAggregator;
