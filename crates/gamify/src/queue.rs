//! Durable event queue.

use crate::storage::StorageAdapter;
use crate::types::{now_ms, GamifyEvent, QueuedEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Storage key holding the serialized queue.
pub(crate) const QUEUE_KEY: &str = "queue";

/// Outcome of bumping attempt counters after a failed delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptUpdate {
    /// Entries removed because they reached the attempt ceiling.
    pub dropped: usize,
    /// Highest attempt count among the entries still queued.
    pub highest_attempts: u32,
}

/// Ordered list of pending events, written through to storage on every change.
///
/// The in-memory list is authoritative for this process. Storage is read once,
/// when the queue is created.
///
/// Every mutation serializes the whole list and hands it to the adapter on
/// the calling thread. With [`FileStorage`](crate::FileStorage) that is a
/// synchronous file write of up to `max_size` entries, so `enqueue` costs
/// grow with the backlog. Keep `max_size` modest when tracking from latency
/// sensitive async code.
#[derive(Debug)]
pub struct EventQueue {
    storage: Arc<dyn StorageAdapter>,
    events: Mutex<Vec<QueuedEvent>>,
    max_size: usize,
    max_attempts: u32,
    evicted: AtomicU64,
}

impl EventQueue {
    /// Create a queue, restoring whatever a previous run persisted.
    ///
    /// Restored entries are ordered by creation time, de-duplicated by id, and
    /// stripped of anything older than `max_age`, out of attempts, or beyond
    /// `max_size`.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        max_size: usize,
        max_attempts: u32,
        max_age: Duration,
    ) -> Self {
        let mut events: Vec<QueuedEvent> = storage.get(QUEUE_KEY).unwrap_or_default();
        let loaded = events.len();

        events.sort_by_key(|e| e.created_at);

        let mut seen = HashSet::new();
        events.retain(|e| seen.insert(e.id.clone()));

        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(max_age_ms);
        events.retain(|e| e.created_at >= cutoff && e.attempts < max_attempts);

        let overflow = events.len().saturating_sub(max_size);
        events.drain(..overflow);

        let discarded = loaded - events.len();
        if discarded > 0 {
            warn!(discarded, "discarded stale, duplicate or excess persisted events");
            storage.set(QUEUE_KEY, &events);
        }
        if !events.is_empty() {
            info!(event_count = events.len(), "restored pending events");
        }

        Self {
            storage,
            events: Mutex::new(events),
            max_size,
            max_attempts,
            evicted: AtomicU64::new(discarded as u64),
        }
    }

    /// Append an event, evicting the oldest entries if the cap is exceeded.
    ///
    /// Persists before returning.
    pub fn enqueue(&self, event: GamifyEvent) -> QueuedEvent {
        let queued = QueuedEvent {
            id: Uuid::new_v4().to_string(),
            event,
            attempts: 0,
            created_at: now_ms(),
        };

        let mut events = self.lock();
        events.push(queued.clone());

        let overflow = events.len().saturating_sub(self.max_size);
        if overflow > 0 {
            events.drain(..overflow);
            self.evicted.fetch_add(overflow as u64, Ordering::Relaxed);
            warn!(
                evicted = overflow,
                max_size = self.max_size,
                "queue full, evicted oldest events"
            );
        }

        self.persist(&events);
        queued
    }

    /// Up to `limit` oldest entries. Nothing is removed.
    pub fn peek_batch(&self, limit: usize) -> Vec<QueuedEvent> {
        self.lock().iter().take(limit).cloned().collect()
    }

    /// Remove delivered entries. Returns how many were removed.
    pub fn remove_by_ids(&self, ids: &[String]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut events = self.lock();
        let before = events.len();
        events.retain(|e| !ids.contains(e.id.as_str()));

        let removed = before - events.len();
        if removed > 0 {
            self.persist(&events);
        }
        removed
    }

    /// Record a failed delivery for the given entries.
    ///
    /// Entries that reach the attempt ceiling are dropped.
    pub fn increment_attempts(&self, ids: &[String]) -> AttemptUpdate {
        if ids.is_empty() {
            return AttemptUpdate::default();
        }

        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut events = self.lock();

        for event in events.iter_mut().filter(|e| ids.contains(e.id.as_str())) {
            event.attempts = event.attempts.saturating_add(1);
        }

        let before = events.len();
        let max_attempts = self.max_attempts;
        events.retain(|e| e.attempts < max_attempts);
        let dropped = before - events.len();

        if dropped > 0 {
            warn!(dropped, max_attempts, "dropping events after repeated delivery failures");
        }

        let highest_attempts = events
            .iter()
            .filter(|e| ids.contains(e.id.as_str()))
            .map(|e| e.attempts)
            .max()
            .unwrap_or(0);

        self.persist(&events);

        AttemptUpdate {
            dropped,
            highest_attempts,
        }
    }

    /// Get the number of events in the queue.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries discarded by the cap or at load time.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn persist(&self, events: &[QueuedEvent]) {
        self.storage.set(QUEUE_KEY, events);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
