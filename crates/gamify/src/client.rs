//! Gamify client implementation.

use crate::builders::{IdentifyBuilder, TrackBuilder};
use crate::config::{GamifyBuilder, GamifyConfig};
use crate::dispatcher::{BatchDispatcher, StatsRecorder};
use crate::identity::{Identity, IdentityStore};
use crate::queue::EventQueue;
use crate::scheduler::{Command, FlushDriver, FlushScheduler, SchedulerState};
use crate::storage::open_storage;
use crate::transport::HttpTransport;
use crate::types::{DeliveryStats, FlushReport, GamifyEvent};
use crate::Error;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Gamify tracking client.
///
/// `track` and `identify` only touch the local queue; delivery happens on a
/// background task. Call [`shutdown`](Gamify::shutdown) before exiting so the
/// final batch gets a chance to go out. Dropping the client without it still
/// attempts a final flush if the runtime stays alive.
///
/// # Example
///
/// ```rust,no_run
/// use gamify::Gamify;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), gamify::Error> {
///     let client = Gamify::builder("gk_xxx")
///         .flush_interval(Duration::from_secs(5))
///         .storage_dir("/var/lib/myapp/gamify")
///         .build()?;
///
///     client.identify("usr_123").trait_("plan", "pro").send();
///
///     client.track("purchase")
///         .property("amount", 42)
///         .send();
///
///     client.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Gamify {
    config: GamifyConfig,
    queue: Arc<EventQueue>,
    identity: IdentityStore,
    stats: Arc<StatsRecorder>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SchedulerState>,
    is_shutdown: AtomicBool,
    driver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl GamifyBuilder {
    /// Build the Gamify client.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Gamify, Error> {
        Gamify::from_builder(self)
    }
}

impl Gamify {
    /// Create a new builder with the given API key.
    pub fn builder(api_key: impl Into<String>) -> GamifyBuilder {
        GamifyBuilder::new(api_key)
    }

    fn from_builder(mut builder: GamifyBuilder) -> Result<Self, Error> {
        let storage = builder.storage.take();
        let config = builder.build_config()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config("the client must be built inside a tokio runtime".into())
        })?;

        let storage = storage.unwrap_or_else(|| {
            open_storage(config.storage_dir(), config.storage_prefix())
        });
        let durable = storage.is_durable();

        let queue = Arc::new(EventQueue::new(
            storage.clone(),
            config.max_queue_size(),
            config.max_attempts(),
            config.max_event_age(),
        ));
        let identity = IdentityStore::load(storage);
        let transport = HttpTransport::new(&config)?;
        let stats = Arc::new(StatsRecorder::default());
        let dispatcher = BatchDispatcher::new(&config, queue.clone(), transport, stats.clone());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let driver = FlushDriver::new(
            FlushScheduler::new(config.flush_interval(), config.max_batch_size()),
            dispatcher,
            command_rx,
            state_tx,
        );
        let handle = runtime.spawn(driver.run());

        info!(
            endpoint = %config.endpoint(),
            durable,
            pending = queue.len(),
            "client started"
        );

        Ok(Self {
            config,
            queue,
            identity,
            stats,
            commands,
            state,
            is_shutdown: AtomicBool::new(false),
            driver_handle: Mutex::new(Some(handle)),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &GamifyConfig {
        &self.config
    }

    /// Get the number of pending events.
    pub fn pending_event_count(&self) -> usize {
        self.queue.len()
    }

    /// Delivery counters since the client was built.
    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot(self.queue.evicted())
    }

    /// Current flush scheduler state.
    pub fn scheduler_state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    // ============================================
    // TRACK
    // ============================================

    /// Track an event.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # fn example(client: &gamify::Gamify) {
    /// client.track("level_completed")
    ///     .property("level", 3)
    ///     .send();
    /// # }
    /// ```
    pub fn track(&self, event_type: impl Into<String>) -> SendableTrack<'_> {
        SendableTrack {
            builder: TrackBuilder::new(event_type),
            client: self,
        }
    }

    // ============================================
    // IDENTITY
    // ============================================

    /// Attach a user id to this device and record an `identify` event.
    ///
    /// The user id is persisted and stamped onto every later event until
    /// [`reset`](Gamify::reset).
    pub fn identify(&self, user_id: impl Into<String>) -> SendableIdentify<'_> {
        SendableIdentify {
            builder: IdentifyBuilder::new(user_id),
            client: self,
        }
    }

    /// Forget the user and rotate the anonymous id. Pending events are kept.
    pub fn reset(&self) {
        if self.is_shutdown() {
            return;
        }
        self.identity.reset();
        debug!("identity reset");
    }

    /// The identified user, if any.
    pub fn user_id(&self) -> Option<String> {
        self.identity.current().user_id
    }

    /// The device's anonymous id.
    pub fn anonymous_id(&self) -> String {
        self.identity.current().anonymous_id
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Flush pending events now instead of waiting for the timer.
    ///
    /// Stops at the first transient failure. Returns an empty report after
    /// shutdown.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> FlushReport {
        if self.is_shutdown() {
            return FlushReport::default();
        }

        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::FlushNow(reply)).is_err() {
            return FlushReport::default();
        }

        response.await.unwrap_or_default()
    }

    /// Shutdown the client gracefully.
    ///
    /// Stops the scheduler and makes one best-effort pass over the backlog.
    /// Events that still fail stay persisted for the next run.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return; // Already shutdown
        }

        info!("shutting down client");

        let _ = self.commands.send(Command::Shutdown);

        if let Some(handle) = self.driver_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "flush driver ended abnormally");
            }
        }
    }

    // ============================================
    // INTERNAL
    // ============================================

    fn enqueue(&self, builder: impl BuildEvent) {
        if self.is_shutdown() {
            debug!("client is shut down, event ignored");
            return;
        }

        let event = match builder.build(&self.identity.current()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "event dropped");
                return;
            }
        };

        let queued = self.queue.enqueue(event);
        if self.config.debug() {
            debug!(
                id = %queued.id,
                event_type = %queued.event.event_type(),
                pending = self.queue.len(),
                "event queued"
            );
        }

        let _ = self.commands.send(Command::Enqueued);
    }
}

// ============================================
// SENDABLE WRAPPERS
// ============================================

trait BuildEvent {
    fn build(self, identity: &Identity) -> Result<GamifyEvent, Error>;
}

impl BuildEvent for TrackBuilder {
    fn build(self, identity: &Identity) -> Result<GamifyEvent, Error> {
        self.build(identity)
    }
}

impl BuildEvent for IdentifyBuilder {
    fn build(self, identity: &Identity) -> Result<GamifyEvent, Error> {
        self.build(identity)
    }
}

/// Sendable track event builder.
pub struct SendableTrack<'a> {
    builder: TrackBuilder,
    client: &'a Gamify,
}

impl<'a> SendableTrack<'a> {
    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.builder = self.builder.property(key, value);
        self
    }

    /// Add several properties.
    pub fn properties<K, V>(mut self, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.builder = self.builder.properties(properties);
        self
    }

    /// Queue and persist the event. Never waits on the network.
    pub fn send(self) {
        self.client.enqueue(self.builder)
    }
}

/// Sendable identify event builder.
pub struct SendableIdentify<'a> {
    builder: IdentifyBuilder,
    client: &'a Gamify,
}

impl<'a> SendableIdentify<'a> {
    /// Add a trait.
    pub fn trait_(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.builder = self.builder.trait_(key, value);
        self
    }

    /// Store the user id and queue the event. Never waits on the network.
    pub fn send(self) {
        let client = self.client;
        if client.is_shutdown() {
            return;
        }

        let user_id = self.builder.user_id();
        if user_id.trim().is_empty() {
            warn!("identify called with an empty user_id, ignored");
            return;
        }

        client.identity.set_user_id(user_id.to_owned());
        client.enqueue(self.builder)
    }
}
