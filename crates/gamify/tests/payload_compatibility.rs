//! Tests to verify event JSON matches what the collection endpoint expects
//! and what earlier runs left in storage.

use gamify::{GamifyEvent, QueuedEvent};
use serde_json::json;
use std::collections::HashMap;

fn sample_event(user_id: Option<&str>) -> GamifyEvent {
    let properties: HashMap<_, _> = [("score".to_string(), json!(1200))].into_iter().collect();
    GamifyEvent::new("level_up", properties, user_id.map(String::from), "anon_1").unwrap()
}

#[test]
fn test_event_json_structure() {
    let json = serde_json::to_value(sample_event(Some("usr_123"))).unwrap();

    assert_eq!(json["type"], "level_up");
    assert_eq!(json["properties"]["score"], 1200);

    // camelCase field names
    assert_eq!(json["userId"], "usr_123");
    assert_eq!(json["anonymousId"], "anon_1");
    assert!(json.get("user_id").is_none());
    assert!(json.get("anonymous_id").is_none());
    assert!(json.get("event_type").is_none());

    assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn test_anonymous_event_omits_user_id() {
    let json = serde_json::to_value(sample_event(None)).unwrap();

    assert!(json.get("userId").is_none());
    assert_eq!(json["anonymousId"], "anon_1");
}

#[test]
fn test_timestamp_is_rfc3339_with_millis() {
    let event = sample_event(None);
    let parsed = chrono::DateTime::parse_from_rfc3339(event.timestamp()).unwrap();

    // e.g. 2026-01-28T00:00:00.000Z
    assert_eq!(event.timestamp().len(), 24);
    assert!(parsed.timestamp_millis() > 0);
}

#[test]
fn test_queued_event_json_structure() {
    let queued = QueuedEvent {
        id: "evt_1".into(),
        event: sample_event(None),
        attempts: 2,
        created_at: 1706400000000,
    };

    let json = serde_json::to_value(&queued).unwrap();

    assert_eq!(json["id"], "evt_1");
    assert_eq!(json["attempts"], 2);
    assert_eq!(json["createdAt"], 1706400000000_i64);
    assert_eq!(json["event"]["type"], "level_up");
    assert!(json.get("created_at").is_none());
}

#[test]
fn test_persisted_event_without_properties_deserializes() {
    let json = json!({
        "id": "evt_9",
        "event": {
            "type": "session_start",
            "timestamp": "2026-01-28T00:00:00.000Z",
            "anonymousId": "anon_9"
        },
        "attempts": 0,
        "createdAt": 1706400000000_i64
    });

    let queued: QueuedEvent = serde_json::from_value(json).unwrap();

    assert_eq!(queued.event.event_type(), "session_start");
    assert!(queued.event.properties().is_empty());
    assert_eq!(queued.event.user_id(), None);
}

#[test]
fn test_empty_event_type_is_rejected() {
    let result = GamifyEvent::new("", HashMap::new(), None, "anon_1");
    assert!(result.is_err());
}
