// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! External metrics sinks.
//!
//! Sinks are best-effort and fire-and-forget: `emit` may reject an event
//! up front, but delivery failures after that point are only logged.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TelemetryError;
use crate::models::{AnalyticsEvent, EventParams};

/// Destination for recorded usage events.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: &AnalyticsEvent) -> Result<(), TelemetryError>;

    fn set_user_id(&self, _uid: &str) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn set_user_property(&self, _name: &str, _value: &str) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn emit(&self, _event: &AnalyticsEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Writes events to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, event: &AnalyticsEvent) -> Result<(), TelemetryError> {
        let params = serde_json::to_string(&event.params)
            .map_err(|e| TelemetryError::Sink(e.to_string()))?;
        tracing::info!(target: "telemetry", event = %event.name, %params, "Analytics event");
        Ok(())
    }

    fn set_user_id(&self, uid: &str) -> Result<(), TelemetryError> {
        tracing::info!(target: "telemetry", uid, "Analytics user id set");
        Ok(())
    }

    fn set_user_property(&self, name: &str, value: &str) -> Result<(), TelemetryError> {
        tracing::info!(target: "telemetry", name, value, "Analytics user property set");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Measurement Protocol
// ─────────────────────────────────────────────────────────────────────────────

const COLLECT_URL: &str = "https://www.google-analytics.com/mp/collect";
const MAX_EVENT_NAME_LEN: usize = 40;
const RESERVED_PREFIXES: [&str; 3] = ["firebase_", "google_", "ga_"];

#[derive(Default)]
struct UserIdentity {
    user_id: Option<String>,
    properties: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PropertyValue<'a> {
    value: &'a str,
}

#[derive(Serialize)]
struct CollectEvent<'a> {
    name: &'a str,
    params: &'a EventParams,
}

#[derive(Serialize)]
struct CollectPayload<'a> {
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    timestamp_micros: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    user_properties: BTreeMap<String, PropertyValue<'a>>,
    events: [CollectEvent<'a>; 1],
}

/// Sends events to the analytics collection endpoint over HTTP.
#[derive(Clone)]
pub struct MeasurementProtocolSink {
    http: reqwest::Client,
    endpoint: String,
    measurement_id: String,
    api_secret: String,
    client_id: String,
    identity: Arc<Mutex<UserIdentity>>,
}

impl MeasurementProtocolSink {
    pub fn new(measurement_id: String, api_secret: String, client_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: COLLECT_URL.to_string(),
            measurement_id,
            api_secret,
            client_id,
            identity: Arc::new(Mutex::new(UserIdentity::default())),
        }
    }

    /// Point the sink at a different collection endpoint (e.g. the debug one).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// JSON body for one event.
    pub fn payload(&self, event: &AnalyticsEvent) -> serde_json::Value {
        let identity = self.identity.lock();
        let payload = CollectPayload {
            client_id: &self.client_id,
            user_id: identity.user_id.clone(),
            timestamp_micros: event.timestamp.timestamp_micros(),
            user_properties: identity
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), PropertyValue { value: v }))
                .collect(),
            events: [CollectEvent {
                name: &event.name,
                params: &event.params,
            }],
        };
        serde_json::to_value(&payload).unwrap_or_default()
    }
}

/// Check an event name against the collection endpoint's naming rules.
pub fn validate_event_name(name: &str) -> Result<(), TelemetryError> {
    let starts_with_letter = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic());
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !starts_with_letter || !valid_chars || name.len() > MAX_EVENT_NAME_LEN {
        return Err(TelemetryError::InvalidEvent(format!(
            "event name {:?} must start with a letter and contain at most {} letters, digits or underscores",
            name, MAX_EVENT_NAME_LEN
        )));
    }
    if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Err(TelemetryError::InvalidEvent(format!(
            "event name {:?} uses a reserved prefix",
            name
        )));
    }
    Ok(())
}

impl MetricsSink for MeasurementProtocolSink {
    fn emit(&self, event: &AnalyticsEvent) -> Result<(), TelemetryError> {
        validate_event_name(&event.name)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TelemetryError::Sink("no async runtime available".to_string()))?;

        let body = self.payload(event);
        let request = self
            .http
            .post(&self.endpoint)
            .query(&[
                ("measurement_id", self.measurement_id.as_str()),
                ("api_secret", self.api_secret.as_str()),
            ])
            .json(&body);
        let name = event.name.clone();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(event = %name, "Analytics event delivered");
                }
                Ok(response) => {
                    tracing::warn!(event = %name, status = %response.status(), "Analytics endpoint rejected event");
                }
                Err(e) => {
                    tracing::warn!(event = %name, error = %e, "Analytics delivery failed");
                }
            }
        });

        Ok(())
    }

    fn set_user_id(&self, uid: &str) -> Result<(), TelemetryError> {
        self.identity.lock().user_id = Some(uid.to_string());
        Ok(())
    }

    fn set_user_property(&self, name: &str, value: &str) -> Result<(), TelemetryError> {
        self.identity
            .lock()
            .properties
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::params;
    use chrono::{TimeZone, Utc};

    fn event(name: &str) -> AnalyticsEvent {
        AnalyticsEvent {
            name: name.to_string(),
            params: params([("page_path", "/home")]),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn validate_event_name_rules() {
        assert!(validate_event_name("page_view").is_ok());
        assert!(validate_event_name("error").is_ok());
        assert!(validate_event_name("").is_err());
        assert!(validate_event_name("1st_visit").is_err());
        assert!(validate_event_name("page-view").is_err());
        assert!(validate_event_name("ga_session").is_err());
        assert!(validate_event_name(&"a".repeat(41)).is_err());
    }

    #[test]
    fn payload_carries_identity_and_event() {
        let sink = MeasurementProtocolSink::new(
            "G-TEST".to_string(),
            "secret".to_string(),
            "123.456".to_string(),
        );
        sink.set_user_id("uid-1").unwrap();
        sink.set_user_property("plan", "free").unwrap();

        let body = sink.payload(&event("page_view"));

        assert_eq!(body["client_id"], "123.456");
        assert_eq!(body["user_id"], "uid-1");
        assert_eq!(body["user_properties"]["plan"]["value"], "free");
        assert_eq!(body["events"][0]["name"], "page_view");
        assert_eq!(body["events"][0]["params"]["page_path"], "/home");
        assert_eq!(body["timestamp_micros"], 1_767_225_600_000_000i64);
    }

    #[test]
    fn emit_without_runtime_is_an_error() {
        let sink = MeasurementProtocolSink::new(
            "G-TEST".to_string(),
            "secret".to_string(),
            "1.1".to_string(),
        );
        assert!(matches!(
            sink.emit(&event("page_view")),
            Err(TelemetryError::Sink(_))
        ));
    }

    #[test]
    fn emit_rejects_invalid_names_before_sending() {
        let sink = MeasurementProtocolSink::new(
            "G-TEST".to_string(),
            "secret".to_string(),
            "1.1".to_string(),
        );
        assert!(matches!(
            sink.emit(&event("bad name")),
            Err(TelemetryError::InvalidEvent(_))
        ));
    }
}
