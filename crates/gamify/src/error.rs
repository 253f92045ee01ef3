//! Error types for the Gamify SDK.

/// Errors surfaced to application code.
///
/// Storage and delivery failures never show up here; they are absorbed by the
/// queue and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Event rejected before it reached the queue.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}
