//! One flush cycle: peek a batch, send it, settle the queue.

use crate::config::{FlushCallback, GamifyConfig};
use crate::queue::EventQueue;
use crate::transport::{DeliveryOutcome, HttpTransport};
use crate::types::{DeliveryStats, FlushReport, GamifyEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `min(max, base * 2^attempts)`.
pub(crate) fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts)).min(max)
}

/// Lifetime counters shared between the dispatcher and the client.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    batches_sent: AtomicU64,
}

impl StatsRecorder {
    fn record(&self, report: &FlushReport) {
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot, counting queue evictions as drops.
    pub(crate) fn snapshot(&self, evicted: u64) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed) + evicted,
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub outcome: DeliveryOutcome,
    pub report: FlushReport,
    /// Set after a transient failure that left events queued.
    pub retry_after: Option<Duration>,
}

/// Moves batches from the queue to the transport.
pub(crate) struct BatchDispatcher {
    queue: Arc<EventQueue>,
    transport: HttpTransport,
    stats: Arc<StatsRecorder>,
    max_batch_size: usize,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    debug: bool,
    on_flush: Option<FlushCallback>,
}

impl BatchDispatcher {
    pub(crate) fn new(
        config: &GamifyConfig,
        queue: Arc<EventQueue>,
        transport: HttpTransport,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            queue,
            transport,
            stats,
            max_batch_size: config.max_batch_size(),
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
            debug: config.debug(),
            on_flush: config.on_flush.clone(),
        }
    }

    pub(crate) fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub(crate) fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Run one cycle. Returns `None` when there was nothing to send.
    pub(crate) async fn run_cycle(&self) -> Option<CycleReport> {
        let batch = self.queue.peek_batch(self.max_batch_size);
        if batch.is_empty() {
            return None;
        }

        let ids: Vec<String> = batch.iter().map(|q| q.id.clone()).collect();
        let events: Vec<&GamifyEvent> = batch.iter().map(|q| &q.event).collect();

        let outcome = self.transport.send(&events).await;

        let mut report = FlushReport::default();
        let mut retry_after = None;

        match &outcome {
            DeliveryOutcome::Delivered => {
                report.delivered = self.queue.remove_by_ids(&ids);
            }
            DeliveryOutcome::RejectedPermanently { status } => {
                report.dropped = self.queue.remove_by_ids(&ids);
                warn!(
                    status,
                    dropped = report.dropped,
                    "batch rejected by endpoint, dropping events"
                );
                if self.debug {
                    for q in &batch {
                        debug!(id = %q.id, event_type = %q.event.event_type(), "dropped rejected event");
                    }
                }
            }
            DeliveryOutcome::Failed { reason } => {
                let update = self.queue.increment_attempts(&ids);
                report.dropped = update.dropped;
                report.failed = batch.len() - update.dropped;

                if report.failed > 0 {
                    let delay = backoff_delay(
                        update.highest_attempts,
                        self.retry_base_delay,
                        self.retry_max_delay,
                    );
                    retry_after = Some(delay);
                    info!(
                        reason = %reason,
                        failed = report.failed,
                        retry_in_ms = delay.as_millis() as u64,
                        "delivery failed, will retry"
                    );
                }
            }
        }

        self.stats.record(&report);
        if let Some(callback) = &self.on_flush {
            callback(&report);
        }

        Some(CycleReport {
            outcome,
            report,
            retry_after,
        })
    }
}
