//! Event builders for fluent API.

use crate::identity::Identity;
use crate::types::GamifyEvent;
use crate::Error;
use serde_json::Value;
use std::collections::HashMap;

/// Event type recorded by `identify`.
pub const IDENTIFY_EVENT: &str = "identify";

// ============================================
// TRACK BUILDER
// ============================================

/// Builder for track events.
#[derive(Debug)]
pub struct TrackBuilder {
    event_type: String,
    properties: HashMap<String, Value>,
}

impl TrackBuilder {
    pub(crate) fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add several properties.
    pub fn properties<K, V>(mut self, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the event.
    pub(crate) fn build(self, identity: &Identity) -> Result<GamifyEvent, Error> {
        GamifyEvent::new(
            self.event_type,
            self.properties,
            identity.user_id.clone(),
            identity.anonymous_id.clone(),
        )
    }
}

// ============================================
// IDENTIFY BUILDER
// ============================================

/// Builder for identify events.
#[derive(Debug)]
pub struct IdentifyBuilder {
    user_id: String,
    traits: HashMap<String, Value>,
}

impl IdentifyBuilder {
    pub(crate) fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            traits: HashMap::new(),
        }
    }

    pub(crate) fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Add a trait.
    pub fn trait_(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    /// Build the event. Traits travel as the event's properties.
    pub(crate) fn build(self, identity: &Identity) -> Result<GamifyEvent, Error> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidEvent("user_id cannot be empty".into()));
        }

        GamifyEvent::new(
            IDENTIFY_EVENT,
            self.traits,
            Some(self.user_id),
            identity.anonymous_id.clone(),
        )
    }
}
