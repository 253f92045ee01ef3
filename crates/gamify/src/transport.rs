//! HTTP transport for sending events.

use crate::config::GamifyConfig;
use crate::types::{DeliveryPayload, GamifyEvent};
use crate::Error;
use reqwest::StatusCode;
use tracing::{debug, warn};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// How the endpoint answered a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Any 2xx.
    Delivered,
    /// 4xx other than 429; retrying will not help.
    RejectedPermanently { status: u16 },
    /// Network error, timeout, 429 or 5xx; worth retrying.
    Failed { reason: String },
}

impl DeliveryOutcome {
    /// Classify an HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            DeliveryOutcome::Delivered
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            DeliveryOutcome::Failed {
                reason: format!("HTTP {}", status),
            }
        } else if status.is_client_error() {
            DeliveryOutcome::RejectedPermanently {
                status: status.as_u16(),
            }
        } else {
            DeliveryOutcome::Failed {
                reason: format!("unexpected HTTP {}", status),
            }
        }
    }
}

/// HTTP transport for sending batches to the collection endpoint.
///
/// Holds no retry state; every call is independent.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: &GamifyConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint().to_owned(),
            api_key: config.api_key().to_owned(),
        })
    }

    /// POST one batch and classify the result.
    pub async fn send(&self, events: &[&GamifyEvent]) -> DeliveryOutcome {
        debug!(
            endpoint = %self.endpoint,
            event_count = events.len(),
            "sending events"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&DeliveryPayload { events })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "request failed");
                return DeliveryOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        let outcome = DeliveryOutcome::from_status(status);

        if outcome == DeliveryOutcome::Delivered {
            debug!(event_count = events.len(), "events sent successfully");
        } else {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".into());
            warn!(status = %status, body = %body, "API request failed");
        }

        outcome
    }
}
