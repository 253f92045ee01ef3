//! Pending events and identity across client restarts.

use gamify::{Gamify, MemoryStorage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_responding(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

async fn delivered_types(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(|request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            body["events"]
                .as_array()
                .unwrap()
                .iter()
                .map(|e| e["type"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test]
async fn test_undelivered_events_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let down = server_responding(503).await;
    let up = server_responding(200).await;

    let first = Gamify::builder("k")
        .endpoint(down.uri())
        .storage_dir(dir.path())
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    first.track("a").send();
    first.track("b").send();
    first.shutdown().await;

    // The final flush failed, so both events are still persisted.
    assert_eq!(first.pending_event_count(), 2);
    assert_eq!(down.received_requests().await.unwrap().len(), 1);
    drop(first);

    let second = Gamify::builder("k")
        .endpoint(up.uri())
        .storage_dir(dir.path())
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    assert_eq!(second.pending_event_count(), 2);

    let report = second.flush().await;
    assert_eq!(report.delivered, 2);
    assert_eq!(second.pending_event_count(), 0);
    assert_eq!(delivered_types(&up).await, vec!["a", "b"]);
    second.shutdown().await;
    drop(second);

    // Removal was persisted too.
    let third = Gamify::builder("k")
        .endpoint(up.uri())
        .storage_dir(dir.path())
        .build()
        .unwrap();
    assert_eq!(third.pending_event_count(), 0);
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_responding(200).await;

    let first = Gamify::builder("k")
        .endpoint(server.uri())
        .storage_dir(dir.path())
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();
    first.identify("usr_42").send();
    let anon = first.anonymous_id();
    first.shutdown().await;
    drop(first);

    let second = Gamify::builder("k")
        .endpoint(server.uri())
        .storage_dir(dir.path())
        .build()
        .unwrap();

    assert_eq!(second.anonymous_id(), anon);
    assert_eq!(second.user_id().as_deref(), Some("usr_42"));
}

#[tokio::test]
async fn test_prefixes_isolate_clients_sharing_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let down = server_responding(503).await;

    let build = |prefix: &str| {
        Gamify::builder("k")
            .endpoint(down.uri())
            .storage_dir(dir.path())
            .storage_prefix(prefix)
            .flush_interval(Duration::from_secs(100))
            .retry_delay(Duration::from_secs(30), Duration::from_secs(60))
            .build()
            .unwrap()
    };

    let game = build("game_");
    let shop = build("shop_");

    game.track("level_up").send();
    game.track("level_up").send();
    shop.track("purchase").send();

    assert_eq!(game.pending_event_count(), 2);
    assert_eq!(shop.pending_event_count(), 1);
    assert_ne!(game.anonymous_id(), shop.anonymous_id());
}

#[tokio::test]
async fn test_unusable_directory_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("not_a_dir");
    std::fs::write(&blocked, b"occupied").unwrap();

    let server = server_responding(200).await;
    let client = Gamify::builder("k")
        .endpoint(server.uri())
        .storage_dir(&blocked)
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    client.track("still_works").send();
    let report = client.flush().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(delivered_types(&server).await, vec!["still_works"]);
}

#[tokio::test]
async fn test_custom_storage_adapter_carries_queue_between_clients() {
    let storage = MemoryStorage::new("gamify_");
    let down = server_responding(500).await;

    let first = Gamify::builder("k")
        .endpoint(down.uri())
        .storage(Arc::new(storage.clone()))
        .flush_interval(Duration::from_secs(100))
        .retry_delay(Duration::from_secs(30), Duration::from_secs(60))
        .build()
        .unwrap();
    first.track("carried").send();
    assert_eq!(first.pending_event_count(), 1);
    drop(first);

    let second = Gamify::builder("k")
        .endpoint(down.uri())
        .storage(Arc::new(storage))
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();
    assert_eq!(second.pending_event_count(), 1);
}

#[tokio::test]
async fn test_queue_cap_evicts_oldest() {
    let down = server_responding(503).await;

    let client = Gamify::builder("k")
        .endpoint(down.uri())
        .max_batch_size(2)
        .max_queue_size(3)
        .flush_interval(Duration::from_secs(100))
        .retry_delay(Duration::from_secs(30), Duration::from_secs(60))
        .build()
        .unwrap();

    // No await in between, so the driver cannot deliver anything yet.
    for i in 0..5 {
        client.track(format!("event_{}", i)).send();
    }

    assert_eq!(client.pending_event_count(), 3);
    assert_eq!(client.stats().dropped, 2);
}
