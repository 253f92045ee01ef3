//! Client configuration.

use crate::storage::StorageAdapter;
use crate::types::FlushReport;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.gamify.dev/v1/events";

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Default max batch size.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Default prefix for every persisted key.
pub const DEFAULT_STORAGE_PREFIX: &str = "gamify_";

/// Default number of failed deliveries before an event is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default cap on persisted events.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default base delay for retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for retry backoff.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default age after which persisted events are discarded on load.
pub const DEFAULT_MAX_EVENT_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Callback invoked after every flush cycle.
pub type FlushCallback = Arc<dyn Fn(&FlushReport) + Send + Sync>;

/// Gamify client configuration.
#[derive(Clone)]
pub struct GamifyConfig {
    pub(crate) api_key: String,
    pub(crate) endpoint: String,
    pub(crate) debug: bool,
    pub(crate) flush_interval: Duration,
    pub(crate) max_batch_size: usize,
    pub(crate) storage_prefix: String,
    pub(crate) storage_dir: Option<PathBuf>,
    pub(crate) max_attempts: u32,
    pub(crate) max_queue_size: usize,
    pub(crate) retry_base_delay: Duration,
    pub(crate) retry_max_delay: Duration,
    pub(crate) timeout: Duration,
    pub(crate) max_event_age: Duration,
    pub(crate) on_flush: Option<FlushCallback>,
}

impl GamifyConfig {
    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the collection endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether per-event diagnostics are enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Get the flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Get the max batch size.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Get the storage key prefix.
    pub fn storage_prefix(&self) -> &str {
        &self.storage_prefix
    }

    /// Get the durable storage directory, if one was configured.
    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    /// Get the attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the queue cap.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Get the retry backoff base.
    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    /// Get the retry backoff ceiling.
    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the staleness cut-off for persisted events.
    pub fn max_event_age(&self) -> Duration {
        self.max_event_age
    }
}

impl fmt::Debug for GamifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GamifyConfig")
            .field("endpoint", &self.endpoint)
            .field("debug", &self.debug)
            .field("flush_interval", &self.flush_interval)
            .field("max_batch_size", &self.max_batch_size)
            .field("storage_prefix", &self.storage_prefix)
            .field("storage_dir", &self.storage_dir)
            .field("max_attempts", &self.max_attempts)
            .field("max_queue_size", &self.max_queue_size)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("timeout", &self.timeout)
            .field("max_event_age", &self.max_event_age)
            .field("on_flush", &self.on_flush.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for the Gamify client.
pub struct GamifyBuilder {
    api_key: String,
    endpoint: Option<String>,
    debug: bool,
    flush_interval: Option<Duration>,
    max_batch_size: Option<usize>,
    storage_prefix: Option<String>,
    storage_dir: Option<PathBuf>,
    max_attempts: Option<u32>,
    max_queue_size: Option<usize>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    timeout: Option<Duration>,
    max_event_age: Option<Duration>,
    on_flush: Option<FlushCallback>,
    pub(crate) storage: Option<Arc<dyn StorageAdapter>>,
}

impl GamifyBuilder {
    /// Create a new builder with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: None,
            debug: false,
            flush_interval: None,
            max_batch_size: None,
            storage_prefix: None,
            storage_dir: None,
            max_attempts: None,
            max_queue_size: None,
            retry_base_delay: None,
            retry_max_delay: None,
            timeout: None,
            max_event_age: None,
            on_flush: None,
            storage: None,
        }
    }

    /// Set the collection endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Enable per-event diagnostics.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Set the max batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Set the prefix used for every persisted key.
    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = Some(prefix.into());
        self
    }

    /// Persist pending events under this directory.
    ///
    /// Without a directory, events are held in memory only.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Use a caller-provided storage adapter instead of probing `storage_dir`.
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the number of failed deliveries after which an event is dropped.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the cap on persisted events.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    /// Set the retry backoff base and ceiling.
    pub fn retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = Some(base);
        self.retry_max_delay = Some(max);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Discard persisted events older than this when loading.
    pub fn max_event_age(mut self, age: Duration) -> Self {
        self.max_event_age = Some(age);
        self
    }

    /// Receive a report after every flush cycle.
    pub fn on_flush(mut self, callback: impl Fn(&FlushReport) + Send + Sync + 'static) -> Self {
        self.on_flush = Some(Arc::new(callback));
        self
    }

    /// Build the configuration.
    pub(crate) fn build_config(self) -> Result<GamifyConfig, crate::Error> {
        if self.api_key.is_empty() {
            return Err(crate::Error::Config("api_key cannot be empty".into()));
        }

        let max_batch_size = self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        if max_batch_size == 0 {
            return Err(crate::Error::Config("max_batch_size must be at least 1".into()));
        }

        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(crate::Error::Config("max_attempts must be at least 1".into()));
        }

        let max_queue_size = self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE);
        if max_queue_size < max_batch_size {
            return Err(crate::Error::Config(format!(
                "max_queue_size ({}) cannot be smaller than max_batch_size ({})",
                max_queue_size, max_batch_size
            )));
        }

        let retry_base_delay = self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY);
        let retry_max_delay = self.retry_max_delay.unwrap_or(DEFAULT_RETRY_MAX_DELAY);
        if retry_max_delay < retry_base_delay {
            return Err(crate::Error::Config(
                "retry max delay cannot be smaller than the base delay".into(),
            ));
        }

        Ok(GamifyConfig {
            api_key: self.api_key,
            endpoint: self.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
            debug: self.debug,
            flush_interval: self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            max_batch_size,
            storage_prefix: self
                .storage_prefix
                .unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.into()),
            storage_dir: self.storage_dir,
            max_attempts,
            max_queue_size,
            retry_base_delay,
            retry_max_delay,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_event_age: self.max_event_age.unwrap_or(DEFAULT_MAX_EVENT_AGE),
            on_flush: self.on_flush,
        })
    }
}

impl fmt::Debug for GamifyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GamifyBuilder")
            .field("endpoint", &self.endpoint)
            .field("storage_dir", &self.storage_dir)
            .field("storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}
