//! Operational event feed.
//!
//! Every extraction and container action emits an `Event`. Events go to a
//! bounded history (for `/events/history`) and to a broadcast channel (for
//! the live `/events` stream). Emitting never blocks: a subscriber that
//! falls behind by more than the channel capacity is dropped from the feed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::health::Verdict;

/// Events buffered per live subscriber.
const SUBSCRIBER_BUFFER: usize = 100;

/// Longest error text carried in a failure event.
const MAX_EVENT_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExtractionStart,
    ExtractionSuccess,
    ExtractionFailure,
    ExtractionCancelled,
    ContainerRestartStarted,
    ContainerRestartCompleted,
    ContainerRestartFailed,
    HealthChanged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtractionStart => "extraction_start",
            Self::ExtractionSuccess => "extraction_success",
            Self::ExtractionFailure => "extraction_failure",
            Self::ExtractionCancelled => "extraction_cancelled",
            Self::ContainerRestartStarted => "container_restart_started",
            Self::ContainerRestartCompleted => "container_restart_completed",
            Self::ContainerRestartFailed => "container_restart_failed",
            Self::HealthChanged => "health_changed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    max_history: usize,
}

impl EventBus {
    pub fn new(max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(max_history)),
            max_history: max_history.max(1),
        }
    }

    pub fn emit(&self, kind: EventKind, data: Value) {
        let event = Event {
            kind,
            data,
            timestamp: Utc::now(),
        };

        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// The most recent `limit` events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        match self.history.lock() {
            Ok(history) => {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    // ── Typed emitters ──────────────────────────────────────

    pub fn extraction_start(&self, file_name: &str, endpoint: &str, size_bytes: usize) {
        self.emit(
            EventKind::ExtractionStart,
            json!({
                "filename": file_name,
                "endpoint": endpoint,
                "file_size_kb": size_bytes / 1024,
            }),
        );
    }

    pub fn extraction_success(
        &self,
        file_name: &str,
        endpoint: &str,
        latency: Duration,
        response_bytes: u64,
        status_code: u16,
    ) {
        self.emit(
            EventKind::ExtractionSuccess,
            json!({
                "filename": file_name,
                "endpoint": endpoint,
                "latency_ms": latency_ms(latency),
                "response_size_kb": response_bytes / 1024,
                "status_code": status_code,
            }),
        );
    }

    pub fn extraction_failure(&self, file_name: &str, endpoint: &str, error: &str, latency: Duration) {
        self.emit(
            EventKind::ExtractionFailure,
            json!({
                "filename": file_name,
                "endpoint": endpoint,
                "error": error.chars().take(MAX_EVENT_ERROR_CHARS).collect::<String>(),
                "latency_ms": latency_ms(latency),
            }),
        );
    }

    pub fn extraction_cancelled(
        &self,
        file_name: &str,
        endpoint: &str,
        latency: Duration,
        bytes_sent: u64,
    ) {
        self.emit(
            EventKind::ExtractionCancelled,
            json!({
                "filename": file_name,
                "endpoint": endpoint,
                "latency_ms": latency_ms(latency),
                "bytes_sent": bytes_sent,
            }),
        );
    }

    pub fn health_changed(&self, previous: Verdict, current: Verdict) {
        self.emit(
            EventKind::HealthChanged,
            json!({ "previous": previous, "current": current }),
        );
    }
}

fn latency_ms(latency: Duration) -> f64 {
    (latency.as_secs_f64() * 10_000.0).round() / 10.0
}
