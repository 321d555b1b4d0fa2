// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Usage telemetry aggregation.
//!
//! Keeps the last [`MAX_EVENT_HISTORY`] events and the last
//! [`MAX_PAGE_VIEW_HISTORY`] page views, oldest evicted first. Page-view
//! durations count visible time only: hiding the tab stamps the current
//! view's duration and pauses the measurement, showing it again resumes.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::{params, AnalyticsEvent, EventParams, PageView};
use crate::services::metrics::MetricsSink;
use crate::time_utils::{Clock, SystemClock};

pub const MAX_EVENT_HISTORY: usize = 100;
pub const MAX_PAGE_VIEW_HISTORY: usize = 50;

pub const PAGE_VIEW_EVENT: &str = "page_view";
pub const ERROR_EVENT: &str = "error";

/// Append-only buffer that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Copy of the contents in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// The page currently being measured.
struct OpenPage {
    path: String,
    /// Visible time banked before the current visible stretch.
    accumulated: Duration,
    /// Start of the current visible stretch; `None` while hidden.
    visible_since: Option<DateTime<Utc>>,
}

impl OpenPage {
    /// Bank the running stretch and return total visible time.
    fn pause(&mut self, now: DateTime<Utc>) -> Duration {
        if let Some(since) = self.visible_since.take() {
            self.accumulated += now - since;
        }
        self.accumulated
    }
}

struct TelemetryState {
    events: BoundedHistory<AnalyticsEvent>,
    page_views: BoundedHistory<PageView>,
    current: Option<OpenPage>,
    hidden: bool,
}

impl TelemetryState {
    /// Write a duration onto the history entry for the open page.
    fn stamp_current(&mut self, duration: Duration) {
        let Some(open) = self.current.as_ref() else {
            return;
        };
        // The open page is always the newest entry unless history was cleared.
        if let Some(view) = self.page_views.last_mut() {
            if view.path == open.path {
                view.duration_ms = Some(duration.num_milliseconds());
            }
        }
    }
}

/// Aggregates usage events and page-view durations.
pub struct TelemetryAggregator {
    state: Mutex<TelemetryState>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl TelemetryAggregator {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self::with_clock(sink, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TelemetryState {
                events: BoundedHistory::new(MAX_EVENT_HISTORY),
                page_views: BoundedHistory::new(MAX_PAGE_VIEW_HISTORY),
                current: None,
                hidden: false,
            }),
            sink,
            clock,
        }
    }

    /// Record a usage event and forward it to the metrics sink.
    pub fn record_event(&self, name: &str, params: EventParams) {
        let event = AnalyticsEvent {
            name: name.to_string(),
            params,
            timestamp: self.clock.now(),
        };
        self.state.lock().events.push(event.clone());
        self.forward(&event);
    }

    /// Close the open page view (if any), emit `page_view`, and open `path`.
    pub fn record_page_view(&self, path: &str) {
        let now = self.clock.now();
        let event = AnalyticsEvent {
            name: PAGE_VIEW_EVENT.to_string(),
            params: params([("page_path", path)]),
            timestamp: now,
        };

        {
            let mut state = self.state.lock();

            if let Some(duration) = state.current.as_mut().map(|open| open.pause(now)) {
                state.stamp_current(duration);
            }

            state.events.push(event.clone());

            let visible_since = (!state.hidden).then_some(now);
            state.current = Some(OpenPage {
                path: path.to_string(),
                accumulated: Duration::zero(),
                visible_since,
            });
            state.page_views.push(PageView {
                path: path.to_string(),
                started_at: now,
                duration_ms: None,
            });
        }

        tracing::debug!(path, "Page view opened");
        self.forward(&event);
    }

    /// Track tab visibility so hidden time is excluded from durations.
    ///
    /// Visible time accumulates across hide/show pairs; showing the page
    /// again does not discard the time already counted before it was hidden.
    pub fn on_visibility_change(&self, hidden: bool) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.hidden == hidden {
            return;
        }
        state.hidden = hidden;

        if hidden {
            if let Some(duration) = state.current.as_mut().map(|open| open.pause(now)) {
                state.stamp_current(duration);
            }
        } else if let Some(open) = state.current.as_mut() {
            open.visible_since = Some(now);
        }
    }

    /// Record an `error` event. Context entries override `error_message`.
    pub fn record_error(&self, message: &str, context: EventParams) {
        let mut params = params([("error_message", message)]);
        params.extend(context);
        self.record_event(ERROR_EVENT, params);
    }

    pub fn set_user_identifier(&self, uid: &str) {
        if let Err(e) = self.sink.set_user_id(uid) {
            tracing::warn!(error = %e, "Error setting user ID");
        }
    }

    pub fn set_user_property(&self, name: &str, value: &str) {
        if let Err(e) = self.sink.set_user_property(name, value) {
            tracing::warn!(error = %e, name, "Error setting user property");
        }
    }

    pub fn history(&self) -> Vec<AnalyticsEvent> {
        self.state.lock().events.snapshot()
    }

    pub fn page_view_history(&self) -> Vec<PageView> {
        self.state.lock().page_views.snapshot()
    }

    /// Path of the page currently being measured.
    pub fn current_page(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|p| p.path.clone())
    }

    /// Empty both histories and forget the open page.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.page_views.clear();
        state.current = None;
    }

    fn forward(&self, event: &AnalyticsEvent) {
        if let Err(e) = self.sink.emit(event) {
            tracing::warn!(error = %e, event = %event.name, "Error logging event to metrics sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_history_evicts_oldest_first() {
        let mut history = BoundedHistory::new(3);
        for i in 0..5 {
            history.push(i);
        }
        assert_eq!(history.snapshot(), vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn zero_capacity_history_stays_empty() {
        let mut history = BoundedHistory::new(0);
        history.push("x");
        assert!(history.is_empty());
    }

    #[test]
    fn pause_banks_only_visible_time() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let mut page = OpenPage {
            path: "/".to_string(),
            accumulated: Duration::zero(),
            visible_since: Some(start),
        };

        assert_eq!(page.pause(start + Duration::seconds(2)), Duration::seconds(2));
        // Already paused: no further time accrues.
        assert_eq!(page.pause(start + Duration::seconds(9)), Duration::seconds(2));
    }
}
