//! Decides when flush cycles run, and runs them one at a time.

use crate::dispatcher::{BatchDispatcher, CycleReport};
use crate::transport::DeliveryOutcome;
use crate::types::FlushReport;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Queue empty, no timer armed.
    Idle,
    /// Events waiting; a flush is due at the armed deadline.
    Scheduled,
    /// A batch is on the wire.
    FlushInFlight,
}

/// Messages from the client to the driver task.
#[derive(Debug)]
pub(crate) enum Command {
    Enqueued,
    FlushNow(oneshot::Sender<FlushReport>),
    Shutdown,
}

/// Cap on how far out a deadline is armed. Longer intervals effectively
/// disable the timer.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + delay` without overflowing `Instant`.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

/// Pure flush-timing state machine.
#[derive(Debug)]
pub(crate) struct FlushScheduler {
    state: SchedulerState,
    deadline: Option<Instant>,
    backoff_until: Option<Instant>,
    flush_interval: Duration,
    max_batch_size: usize,
}

impl FlushScheduler {
    pub(crate) fn new(flush_interval: Duration, max_batch_size: usize) -> Self {
        Self {
            state: SchedulerState::Idle,
            deadline: None,
            backoff_until: None,
            flush_interval,
            max_batch_size,
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        self.state
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn backing_off(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }

    /// The queue may have grown. Returns true if a flush should start now.
    pub(crate) fn on_enqueued(&mut self, queue_len: usize, now: Instant) -> bool {
        match self.state {
            SchedulerState::FlushInFlight => return false,
            SchedulerState::Idle => {
                if queue_len == 0 {
                    return false;
                }
                self.state = SchedulerState::Scheduled;
                self.deadline = Some(deadline_after(now, self.flush_interval));
            }
            SchedulerState::Scheduled => {}
        }

        queue_len >= self.max_batch_size && !self.backing_off(now)
    }

    /// The armed deadline fired. Returns true if a flush should start now.
    pub(crate) fn on_timer(&mut self, queue_len: usize, now: Instant) -> bool {
        if self.state != SchedulerState::Scheduled || self.deadline.is_some_and(|d| now < d) {
            return false;
        }

        if queue_len == 0 {
            self.state = SchedulerState::Idle;
            self.deadline = None;
            self.backoff_until = None;
            return false;
        }

        true
    }

    pub(crate) fn begin_flush(&mut self) {
        self.state = SchedulerState::FlushInFlight;
        self.deadline = None;
    }

    /// The in-flight cycle finished.
    pub(crate) fn complete_flush(
        &mut self,
        queue_len: usize,
        retry_after: Option<Duration>,
        now: Instant,
    ) {
        if queue_len == 0 {
            self.state = SchedulerState::Idle;
            self.deadline = None;
            self.backoff_until = None;
            return;
        }

        self.state = SchedulerState::Scheduled;
        match retry_after {
            Some(delay) => {
                let until = deadline_after(now, delay);
                self.backoff_until = Some(until);
                self.deadline = Some(until);
            }
            None => {
                self.backoff_until = None;
                self.deadline = if queue_len >= self.max_batch_size {
                    Some(now)
                } else {
                    Some(deadline_after(now, self.flush_interval))
                };
            }
        }
    }
}

/// Triggers gathered from one wake-up of the driver.
#[derive(Default)]
struct Pending {
    enqueued: bool,
    timer: bool,
    shutdown: bool,
    waiters: Vec<oneshot::Sender<FlushReport>>,
}

impl Pending {
    fn record(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Enqueued) => self.enqueued = true,
            Some(Command::FlushNow(reply)) => self.waiters.push(reply),
            // A closed channel means the client was dropped without shutdown.
            Some(Command::Shutdown) | None => self.shutdown = true,
        }
    }

    fn record_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Command(command) => self.record(command),
            Wake::Timer => self.timer = true,
        }
    }
}

enum Wake {
    Command(Option<Command>),
    Timer,
}

/// Background task owning the scheduler and the dispatcher.
///
/// Every cycle runs here, so at most one batch is ever in flight. Commands
/// that arrive mid-flight wait in the channel and are coalesced afterwards.
pub(crate) struct FlushDriver {
    scheduler: FlushScheduler,
    dispatcher: BatchDispatcher,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SchedulerState>,
}

impl FlushDriver {
    pub(crate) fn new(
        scheduler: FlushScheduler,
        dispatcher: BatchDispatcher,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<SchedulerState>,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            commands,
            state_tx,
        }
    }

    pub(crate) async fn run(mut self) {
        // Events restored from storage count as freshly enqueued.
        let mut pending = Pending {
            enqueued: true,
            ..Pending::default()
        };

        loop {
            while let Ok(command) = self.commands.try_recv() {
                pending.record(Some(command));
            }

            if pending.shutdown {
                let report = self.flush_backlog().await;
                info!(
                    delivered = report.delivered,
                    remaining = self.dispatcher.queue().len(),
                    "final flush complete"
                );
                for waiter in pending.waiters.drain(..) {
                    let _ = waiter.send(report);
                }
                break;
            }

            if !pending.waiters.is_empty() {
                let report = self.flush_backlog().await;
                for waiter in pending.waiters.drain(..) {
                    let _ = waiter.send(report);
                }
            }

            let now = Instant::now();
            let queue_len = self.dispatcher.queue().len();
            let mut due = false;
            if pending.enqueued {
                due |= self.scheduler.on_enqueued(queue_len, now);
            }
            if pending.timer {
                due |= self.scheduler.on_timer(queue_len, now);
            }
            pending = Pending::default();

            if due {
                self.flush_once().await;
            }
            self.publish();

            pending.record_wake(self.wait().await);
        }

        self.set_state(SchedulerState::Idle);
        debug!("flush driver stopped");
    }

    async fn wait(&mut self) -> Wake {
        match self.scheduler.deadline() {
            Some(deadline) => tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                _ = sleep_until(deadline) => Wake::Timer,
            },
            None => Wake::Command(self.commands.recv().await),
        }
    }

    /// One cycle, with the state machine around it.
    async fn flush_once(&mut self) -> Option<CycleReport> {
        self.scheduler.begin_flush();
        self.publish();

        let cycle = self.dispatcher.run_cycle().await;

        let retry_after = cycle.as_ref().and_then(|c| c.retry_after);
        self.scheduler
            .complete_flush(self.dispatcher.queue().len(), retry_after, Instant::now());
        self.publish();

        cycle
    }

    /// Send batches until the backlog present at the start is gone or a
    /// delivery fails.
    async fn flush_backlog(&mut self) -> FlushReport {
        let batch_size = self.dispatcher.max_batch_size();
        let max_cycles = self.dispatcher.queue().len().div_ceil(batch_size);
        let mut total = FlushReport::default();

        for _ in 0..max_cycles {
            let Some(cycle) = self.flush_once().await else {
                break;
            };
            total.merge(cycle.report);
            if matches!(cycle.outcome, DeliveryOutcome::Failed { .. }) {
                break;
            }
        }

        total
    }

    fn publish(&self) {
        self.set_state(self.scheduler.state());
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn scheduler() -> FlushScheduler {
        FlushScheduler::new(INTERVAL, 3)
    }

    #[test]
    fn test_first_event_arms_timer() {
        let mut s = scheduler();
        let now = Instant::now();

        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(!s.on_enqueued(0, now));
        assert_eq!(s.state(), SchedulerState::Idle);

        assert!(!s.on_enqueued(1, now));
        assert_eq!(s.state(), SchedulerState::Scheduled);
        assert_eq!(s.deadline(), Some(now + INTERVAL));

        // Later events keep the original deadline.
        assert!(!s.on_enqueued(2, now + Duration::from_secs(1)));
        assert_eq!(s.deadline(), Some(now + INTERVAL));
    }

    #[test]
    fn test_batch_size_triggers_immediately() {
        let mut s = scheduler();
        let now = Instant::now();

        s.on_enqueued(1, now);
        assert!(s.on_enqueued(3, now));
    }

    #[test]
    fn test_full_batch_from_idle_triggers() {
        let mut s = scheduler();
        assert!(s.on_enqueued(3, Instant::now()));
        assert_eq!(s.state(), SchedulerState::Scheduled);
    }

    #[test]
    fn test_timer_triggers_only_after_deadline() {
        let mut s = scheduler();
        let now = Instant::now();
        s.on_enqueued(1, now);

        assert!(!s.on_timer(1, now + Duration::from_secs(5)));
        assert!(s.on_timer(1, now + INTERVAL));
    }

    #[test]
    fn test_timer_with_empty_queue_goes_idle() {
        let mut s = scheduler();
        let now = Instant::now();
        s.on_enqueued(1, now);

        assert!(!s.on_timer(0, now + INTERVAL));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert_eq!(s.deadline(), None);
    }

    #[test]
    fn test_in_flight_ignores_triggers() {
        let mut s = scheduler();
        let now = Instant::now();
        s.on_enqueued(3, now);
        s.begin_flush();

        assert_eq!(s.state(), SchedulerState::FlushInFlight);
        assert!(!s.on_enqueued(10, now));
        assert!(!s.on_timer(10, now + INTERVAL));
    }

    #[test]
    fn test_complete_with_empty_queue_goes_idle() {
        let mut s = scheduler();
        let now = Instant::now();
        s.on_enqueued(3, now);
        s.begin_flush();
        s.complete_flush(0, None, now);

        assert_eq!(s.state(), SchedulerState::Idle);
        assert_eq!(s.deadline(), None);
    }

    #[test]
    fn test_complete_with_remaining_reschedules() {
        let mut s = scheduler();
        let now = Instant::now();

        s.begin_flush();
        s.complete_flush(1, None, now);
        assert_eq!(s.state(), SchedulerState::Scheduled);
        assert_eq!(s.deadline(), Some(now + INTERVAL));

        s.begin_flush();
        s.complete_flush(5, None, now);
        assert_eq!(s.deadline(), Some(now));
    }

    #[test]
    fn test_backoff_suppresses_size_trigger() {
        let mut s = scheduler();
        let now = Instant::now();
        let delay = Duration::from_secs(4);

        s.begin_flush();
        s.complete_flush(3, Some(delay), now);
        assert_eq!(s.deadline(), Some(now + delay));

        assert!(!s.on_enqueued(4, now + Duration::from_secs(1)));
        assert!(s.on_enqueued(4, now + delay));
    }

    #[test]
    fn test_successful_flush_clears_backoff() {
        let mut s = scheduler();
        let now = Instant::now();

        s.begin_flush();
        s.complete_flush(3, Some(Duration::from_secs(30)), now);
        s.begin_flush();
        s.complete_flush(1, None, now);

        assert!(s.on_enqueued(3, now));
    }

    #[test]
    fn test_huge_interval_does_not_overflow() {
        let mut s = FlushScheduler::new(Duration::MAX, 3);
        let now = Instant::now();

        assert!(!s.on_enqueued(1, now));
        assert_eq!(s.deadline(), Some(now + FAR_FUTURE));

        s.begin_flush();
        s.complete_flush(1, None, now);
        assert_eq!(s.deadline(), Some(now + FAR_FUTURE));
        assert!(s.on_enqueued(3, now));
    }

    #[test]
    fn test_huge_backoff_does_not_overflow() {
        let mut s = scheduler();
        let now = Instant::now();

        s.begin_flush();
        s.complete_flush(3, Some(Duration::MAX), now);

        assert_eq!(s.deadline(), Some(now + FAR_FUTURE));
        assert!(!s.on_enqueued(4, now));
    }
}
