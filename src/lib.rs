// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session & telemetry coordination for a hosted identity backend.
//!
//! This crate tracks identity state, mirrors a per-user profile document
//! with a login counter, and aggregates lightweight usage telemetry.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use db::{FirestoreProfileStore, ProfileStore};
use services::{
    IdentityProvider, IdentityToolkitProvider, MeasurementProtocolSink, MetricsSink,
    ProfileSynchronizer, SessionCoordinator, TelemetryAggregator, TracingSink,
};

/// Per-application service object, constructed once and shared by reference.
pub struct SessionServices {
    pub config: Config,
    pub coordinator: SessionCoordinator,
    pub telemetry: TelemetryAggregator,
}

impl SessionServices {
    /// Wire services from already-built collaborators.
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let synchronizer = ProfileSynchronizer::new(store, config.sync_strategy);
        Arc::new(Self {
            coordinator: SessionCoordinator::new(provider, synchronizer),
            telemetry: TelemetryAggregator::new(sink),
            config,
        })
    }

    /// Connect to the hosted identity platform and profile store.
    pub async fn connect(config: Config) -> anyhow::Result<Arc<Self>> {
        let store =
            FirestoreProfileStore::with_collection(&config.project_id, &config.profile_collection)
                .await?;
        tracing::info!(
            project = %config.project_id,
            collection = %config.profile_collection,
            "Profile store connected"
        );

        let sink: Arc<dyn MetricsSink> = match config.analytics() {
            Some((measurement_id, api_secret)) => {
                tracing::info!(measurement_id, "Analytics enabled");
                Arc::new(MeasurementProtocolSink::new(
                    measurement_id.to_string(),
                    api_secret.to_string(),
                    client_id(),
                ))
            }
            None => Arc::new(TracingSink),
        };

        let provider = Arc::new(IdentityToolkitProvider::from_config(&config));
        let services = Self::new(config, provider.clone(), Arc::new(store), sink);

        provider.restore().await;
        Ok(services)
    }
}

/// Pseudonymous analytics client id in the `<random>.<seconds>` form.
fn client_id() -> String {
    let now = chrono::Utc::now();
    format!(
        "{}.{}",
        now.timestamp_subsec_micros() ^ std::process::id(),
        now.timestamp()
    )
}

/// Initialize structured JSON logging.
pub fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("session_telemetry=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
