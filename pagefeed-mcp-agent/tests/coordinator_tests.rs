use std::time::Duration;

use pagefeed_mcp_agent::coordinator::{Coordinator, RelayError};
use pagefeed_mcp_agent::protocol::StatusResponse;
use serde_json::json;
use tokio::net::TcpListener;

async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn first_instance_owns_second_proxies_with_equivalent_status() {
    let port = free_port().await;

    let owner = Coordinator::start(port).await.unwrap();
    assert!(owner.is_owner());
    assert_eq!(owner.role(), "owner");

    let proxy = Coordinator::start(port).await.unwrap();
    assert!(!proxy.is_owner());
    assert_eq!(proxy.role(), "proxy");

    let direct: StatusResponse = reqwest::get(format!("http://127.0.0.1:{port}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let via_proxy = proxy.status().await.unwrap();

    assert_eq!(direct.connected_clients, via_proxy.connected_clients);
    assert_eq!(direct.pending_feedback, via_proxy.pending_feedback);
}

#[tokio::test]
async fn proxy_operations_round_trip_through_the_owner() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();
    let proxy = Coordinator::start(port).await.unwrap();

    // Seed the owner's queue directly.
    let relay = owner.relay().unwrap();
    relay
        .queue
        .submit(serde_json::from_value(json!({"id": "p1", "description": "via owner"})).unwrap())
        .await;

    let summary = proxy.summarize().await.unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.items[0].id, "p1");

    // Peek without clearing, then delete through the proxy.
    let peeked = proxy.read_feedback(false).await.unwrap();
    assert_eq!(peeked.len(), 1);
    assert!(proxy.delete("p1").await.unwrap());
    assert!(!proxy.delete("p1").await.unwrap());
    assert_eq!(proxy.status().await.unwrap().pending_feedback, 0);
}

#[tokio::test]
async fn proxy_wait_one_polls_until_feedback_arrives() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();
    let proxy = Coordinator::start(port).await.unwrap();

    let relay = owner.relay().unwrap().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        relay
            .queue
            .submit(serde_json::from_value(json!({"id": "w1", "description": "late"})).unwrap())
            .await;
    });

    let item = proxy.wait_one(Duration::from_secs(5)).await.unwrap();
    assert_eq!(item.id, "w1");
    assert_eq!(owner.relay().unwrap().queue.len().await, 0);
}

#[tokio::test]
async fn proxy_wait_one_times_out_like_the_owner() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();
    let proxy = Coordinator::start(port).await.unwrap();

    let timeout = Duration::from_millis(300);
    let proxy_result = proxy.wait_one(timeout).await;
    assert!(matches!(proxy_result, Err(RelayError::Timeout(_))));

    let owner_result = owner.wait_one(timeout).await;
    assert!(matches!(owner_result, Err(RelayError::Timeout(_))));
}

#[tokio::test]
async fn owner_wait_one_resolves_from_queue_submission() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();

    let relay = owner.relay().unwrap().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        relay
            .queue
            .submit(serde_json::from_value(json!({"id": "o1", "description": "hi"})).unwrap())
            .await;
    });

    let item = owner.wait_one(Duration::from_secs(5)).await.unwrap();
    assert_eq!(item.id, "o1");
}

#[tokio::test]
async fn unreachable_sibling_degrades_instead_of_crashing() {
    // Occupy the port so the coordinator starts as a proxy, then free it so
    // remote calls hit a closed port.
    let holder = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let proxy = Coordinator::start(port).await.unwrap();
    assert!(!proxy.is_owner());
    drop(holder);

    let result = proxy.status().await;
    assert!(matches!(result, Err(RelayError::Unreachable(_))));

    let read = proxy.read_feedback(true).await;
    assert!(matches!(read, Err(RelayError::Unreachable(_))));
}

#[tokio::test]
async fn owner_multi_feedback_collects_until_batch_complete() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();
    let relay = owner.relay().unwrap().clone();

    // Stale item from before the session must be cleared, not returned.
    relay
        .queue
        .submit(serde_json::from_value(json!({"id": "stale", "description": "old"})).unwrap())
        .await;

    let collector = {
        let relay = relay.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            for id in ["m1", "m2"] {
                relay
                    .queue
                    .submit(
                        serde_json::from_value(json!({"id": id, "description": "batch"}))
                            .unwrap(),
                    )
                    .await;
            }
            relay.notify_batch_complete(2);
        })
    };

    let items = owner
        .wait_multiple("annotate everything", Duration::from_secs(5))
        .await
        .unwrap();
    collector.await.unwrap();

    let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!(relay.queue.is_empty().await);
}

#[tokio::test]
async fn proxy_multi_feedback_completes_on_idle_after_collecting() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();
    let proxy = Coordinator::start(port).await.unwrap();

    // No batch-complete message ever arrives; the proxy has to finish the
    // session off the silence-after-items heuristic instead.
    let relay = owner.relay().unwrap().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        for id in ["b1", "b2"] {
            relay
                .queue
                .submit(serde_json::from_value(json!({"id": id, "description": "batch"})).unwrap())
                .await;
        }
    });

    let started = std::time::Instant::now();
    let items = proxy
        .wait_multiple("mark everything", Duration::from_secs(30))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["b1", "b2"]);
    // Finished well before the 30s deadline, so the idle heuristic fired.
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
    assert!(owner.relay().unwrap().queue.is_empty().await);
}

#[tokio::test]
async fn broadcast_rejects_untyped_bodies_and_names_accepted_shapes() {
    let port = free_port().await;
    let _owner = Coordinator::start(port).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/broadcast"))
        .json(&json!({"kind": "mystery"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    let accepted = body["accepted"].as_array().unwrap();
    assert!(accepted.iter().any(|t| t == "request_annotation"));
    assert!(accepted.iter().any(|t| t == "pong"));
}

#[tokio::test]
async fn owner_multi_feedback_times_out_without_completion_signal() {
    let port = free_port().await;
    let owner = Coordinator::start(port).await.unwrap();

    let result = owner
        .wait_multiple("anyone there?", Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(RelayError::Timeout(_))));
}
