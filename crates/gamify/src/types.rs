//! Event types and serialization.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Get current timestamp in milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an RFC 3339 string with millisecond precision.
pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A tracked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamifyEvent {
    #[serde(rename = "type")]
    pub(crate) event_type: String,
    #[serde(default)]
    pub(crate) properties: HashMap<String, serde_json::Value>,
    pub(crate) timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) user_id: Option<String>,
    pub(crate) anonymous_id: String,
}

impl GamifyEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        properties: HashMap<String, serde_json::Value>,
        user_id: Option<String>,
        anonymous_id: impl Into<String>,
    ) -> Result<Self, crate::Error> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(crate::Error::InvalidEvent("event type cannot be empty".into()));
        }

        Ok(Self {
            event_type,
            properties,
            timestamp: now_iso8601(),
            user_id,
            anonymous_id: anonymous_id.into(),
        })
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }
}

/// An event waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    pub id: String,
    pub event: GamifyEvent,
    pub attempts: u32,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// Body posted to the collection endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct DeliveryPayload<'a> {
    pub events: &'a [&'a GamifyEvent],
}

/// Result of one or more flush cycles, counted in events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Confirmed by the endpoint.
    pub delivered: usize,
    /// Sent but failed transiently; still queued for retry.
    pub failed: usize,
    /// Removed without delivery (rejected or out of attempts).
    pub dropped: usize,
}

impl FlushReport {
    pub(crate) fn merge(&mut self, other: FlushReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.dropped == 0
    }
}

/// Cumulative delivery counters for the lifetime of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    /// Rejected, out of attempts, evicted by the cap or stale.
    pub dropped: u64,
    /// HTTP requests made.
    pub batches_sent: u64,
}
