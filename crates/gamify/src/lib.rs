//! Gamify event tracking SDK for Rust.
//!
//! Events are queued locally, persisted when a storage directory is
//! configured, and delivered in batches by a background task. Delivery is
//! retried with exponential backoff; nothing here ever fails the host
//! application once the client is built.
//!
//! # Example
//!
//! ```rust,ignore
//! use gamify::Gamify;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gamify::Error> {
//!     let client = Gamify::builder("gk_xxx")
//!         .flush_interval(Duration::from_secs(5))
//!         .max_batch_size(20)
//!         .storage_dir(".gamify")
//!         .build()?;
//!
//!     client.track("purchase")
//!         .property("sku", "gem_pack_small")
//!         .property("amount", 499)
//!         .send();
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod builders;
mod client;
mod config;
mod dispatcher;
mod error;
mod identity;
mod queue;
mod scheduler;
pub mod storage;
mod transport;
mod types;

pub use builders::{IdentifyBuilder, TrackBuilder, IDENTIFY_EVENT};
pub use client::{Gamify, SendableIdentify, SendableTrack};
pub use config::{
    FlushCallback, GamifyBuilder, GamifyConfig, DEFAULT_ENDPOINT, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_STORAGE_PREFIX,
};
pub use error::Error;
pub use queue::{AttemptUpdate, EventQueue};
pub use scheduler::SchedulerState;
pub use storage::{open_storage, FileStorage, MemoryStorage, StorageAdapter};
pub use transport::{DeliveryOutcome, HttpTransport, API_KEY_HEADER};
pub use types::{DeliveryStats, FlushReport, GamifyEvent, QueuedEvent};
