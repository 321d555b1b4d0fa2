// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Telemetry aggregation: bounded histories and visible-time durations.

use chrono::Duration;
use parking_lot::Mutex;
use session_telemetry::error::TelemetryError;
use session_telemetry::models::{params, AnalyticsEvent, EventParams, ParamValue};
use session_telemetry::services::telemetry::{MAX_EVENT_HISTORY, MAX_PAGE_VIEW_HISTORY};
use session_telemetry::services::{MetricsSink, TelemetryAggregator};
use session_telemetry::time_utils::ManualClock;
use std::sync::Arc;

mod common;
use common::{t0, test_telemetry};

/// Sink that records what it is given, optionally failing every call.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
    user_ids: Mutex<Vec<String>>,
    failing: bool,
}

impl MetricsSink for RecordingSink {
    fn emit(&self, event: &AnalyticsEvent) -> Result<(), TelemetryError> {
        if self.failing {
            return Err(TelemetryError::Sink("sink offline".to_string()));
        }
        self.events.lock().push(event.name.clone());
        Ok(())
    }

    fn set_user_id(&self, uid: &str) -> Result<(), TelemetryError> {
        if self.failing {
            return Err(TelemetryError::Sink("sink offline".to_string()));
        }
        self.user_ids.lock().push(uid.to_string());
        Ok(())
    }
}

#[test]
fn test_event_history_keeps_newest_hundred() {
    let (telemetry, _clock) = test_telemetry();

    for i in 0..(MAX_EVENT_HISTORY + 20) {
        telemetry.record_event("tick", params([("i", i as i64)]));
    }

    let history = telemetry.history();
    assert_eq!(history.len(), MAX_EVENT_HISTORY);
    assert_eq!(history[0].params["i"], ParamValue::Number(20.0));
    assert_eq!(
        history[MAX_EVENT_HISTORY - 1].params["i"],
        ParamValue::Number((MAX_EVENT_HISTORY + 19) as f64)
    );
}

#[test]
fn test_page_view_history_keeps_newest_fifty() {
    let (telemetry, _clock) = test_telemetry();

    for i in 0..(MAX_PAGE_VIEW_HISTORY + 5) {
        telemetry.record_page_view(&format!("/page/{}", i));
    }

    let views = telemetry.page_view_history();
    assert_eq!(views.len(), MAX_PAGE_VIEW_HISTORY);
    assert_eq!(views[0].path, "/page/5");
    assert_eq!(
        views.last().unwrap().path,
        format!("/page/{}", MAX_PAGE_VIEW_HISTORY + 4)
    );
}

#[test]
fn test_navigation_closes_previous_view() {
    let (telemetry, clock) = test_telemetry();

    telemetry.record_page_view("/a");
    clock.advance(Duration::milliseconds(500));
    telemetry.record_page_view("/b");

    let views = telemetry.page_view_history();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].path, "/a");
    assert_eq!(views[0].duration_ms, Some(500));
    assert_eq!(views[0].started_at, t0());
    assert_eq!(views[1].path, "/b");
    assert_eq!(views[1].duration_ms, None);
    assert_eq!(telemetry.current_page().as_deref(), Some("/b"));

    let events = telemetry.history();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.name == "page_view"));
    assert_eq!(events[1].params["page_path"], ParamValue::from("/b"));
}

#[test]
fn test_hidden_interval_is_excluded() {
    let (telemetry, clock) = test_telemetry();

    telemetry.record_page_view("/a");
    clock.advance(Duration::milliseconds(200));
    telemetry.on_visibility_change(true);

    // Hiding stamps the visible time so far without closing the view.
    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(200));
    assert_eq!(telemetry.current_page().as_deref(), Some("/a"));

    clock.advance(Duration::milliseconds(1000));
    telemetry.on_visibility_change(false);
    clock.advance(Duration::milliseconds(300));
    telemetry.record_page_view("/b");

    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(500));
}

#[test]
fn test_repeated_visibility_signals_are_ignored() {
    let (telemetry, clock) = test_telemetry();

    telemetry.record_page_view("/a");
    clock.advance(Duration::milliseconds(100));
    telemetry.on_visibility_change(true);
    clock.advance(Duration::milliseconds(100));
    telemetry.on_visibility_change(true);
    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(100));

    telemetry.on_visibility_change(false);
    clock.advance(Duration::milliseconds(100));
    telemetry.on_visibility_change(false);
    clock.advance(Duration::milliseconds(100));
    telemetry.record_page_view("/b");
    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(300));
}

#[test]
fn test_hidden_page_keeps_last_stamp() {
    let (telemetry, clock) = test_telemetry();

    telemetry.record_page_view("/a");
    clock.advance(Duration::seconds(2));
    telemetry.on_visibility_change(true);
    clock.advance(Duration::hours(1));

    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(2000));
}

#[test]
fn test_navigation_while_hidden_starts_paused() {
    let (telemetry, clock) = test_telemetry();

    telemetry.on_visibility_change(true);
    telemetry.record_page_view("/a");
    clock.advance(Duration::seconds(5));
    telemetry.on_visibility_change(false);
    clock.advance(Duration::seconds(1));
    telemetry.record_page_view("/b");

    assert_eq!(telemetry.page_view_history()[0].duration_ms, Some(1000));
}

#[test]
fn test_record_error_context_overrides_message() {
    let (telemetry, _clock) = test_telemetry();

    let mut context = EventParams::new();
    context.insert("component".to_string(), ParamValue::from("Login"));
    telemetry.record_error("boom", context);
    telemetry.record_error("boom", params([("error_message", "redacted")]));

    let history = telemetry.history();
    assert_eq!(history[0].name, "error");
    assert_eq!(history[0].params["error_message"], ParamValue::from("boom"));
    assert_eq!(history[0].params["component"], ParamValue::from("Login"));
    assert_eq!(
        history[1].params["error_message"],
        ParamValue::from("redacted")
    );
}

#[test]
fn test_clear_empties_histories_and_open_page() {
    let (telemetry, clock) = test_telemetry();
    telemetry.record_page_view("/a");
    telemetry.record_event("click", EventParams::new());

    telemetry.clear();
    assert!(telemetry.history().is_empty());
    assert!(telemetry.page_view_history().is_empty());
    assert!(telemetry.current_page().is_none());

    clock.advance(Duration::seconds(1));
    telemetry.record_page_view("/b");
    assert_eq!(telemetry.page_view_history().len(), 1);
    assert_eq!(telemetry.page_view_history()[0].duration_ms, None);
}

#[test]
fn test_events_are_forwarded_to_sink() {
    let sink = Arc::new(RecordingSink::default());
    let telemetry = TelemetryAggregator::with_clock(sink.clone(), Arc::new(ManualClock::new(t0())));

    telemetry.record_page_view("/home");
    telemetry.record_event("signup_click", EventParams::new());
    telemetry.set_user_identifier("uid-1");

    assert_eq!(*sink.events.lock(), vec!["page_view", "signup_click"]);
    assert_eq!(*sink.user_ids.lock(), vec!["uid-1"]);
}

#[test]
fn test_sink_failures_are_swallowed() {
    let sink = Arc::new(RecordingSink {
        failing: true,
        ..RecordingSink::default()
    });
    let telemetry = TelemetryAggregator::with_clock(sink, Arc::new(ManualClock::new(t0())));

    telemetry.record_event("click", EventParams::new());
    telemetry.record_page_view("/a");
    telemetry.set_user_identifier("uid-1");
    telemetry.set_user_property("plan", "free");

    // Local history is unaffected by the sink.
    assert_eq!(telemetry.history().len(), 2);
    assert_eq!(telemetry.page_view_history().len(), 1);
}
