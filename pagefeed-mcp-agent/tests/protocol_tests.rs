use pagefeed_mcp_agent::protocol::{
    BroadcastResponse, ClientMessage, ServerMessage, StatusResponse,
};
use pagefeed_mcp_agent::queue::FeedbackItem;
use serde_json::json;

#[test]
fn feedback_message_parses_with_raw_payload() {
    let text = r#"{"type":"feedback","payload":{"id":"x1","description":"bug"}}"#;
    match serde_json::from_str::<ClientMessage>(text).unwrap() {
        ClientMessage::Feedback { payload } => {
            assert_eq!(payload["id"], "x1");
            assert_eq!(payload["description"], "bug");
        }
        other => panic!("expected feedback message, got {other:?}"),
    }
}

#[test]
fn batch_complete_count_is_optional() {
    let with_count = r#"{"type":"feedback_batch_complete","count":3}"#;
    match serde_json::from_str::<ClientMessage>(with_count).unwrap() {
        ClientMessage::FeedbackBatchComplete { count } => assert_eq!(count, Some(3)),
        other => panic!("unexpected {other:?}"),
    }

    let without = r#"{"type":"feedback_batch_complete"}"#;
    assert!(matches!(
        serde_json::from_str::<ClientMessage>(without).unwrap(),
        ClientMessage::FeedbackBatchComplete { count: None }
    ));
}

#[test]
fn unknown_message_types_fall_into_default_arm() {
    let text = r#"{"type":"totally_new_thing","whatever":true}"#;
    assert!(matches!(
        serde_json::from_str::<ClientMessage>(text).unwrap(),
        ClientMessage::Unknown
    ));
}

#[test]
fn server_messages_carry_expected_type_tags() {
    let connected = serde_json::to_value(ServerMessage::Connected {
        message: "hi".into(),
    })
    .unwrap();
    assert_eq!(connected["type"], "connected");

    let status = serde_json::to_value(ServerMessage::PendingStatus {
        count: 0,
        items: vec![],
    })
    .unwrap();
    assert_eq!(status["type"], "pending_status");
    assert_eq!(status["count"], 0);

    let received = serde_json::to_value(ServerMessage::FeedbackReceived { id: "x1".into() })
        .unwrap();
    assert_eq!(received["type"], "feedback_received");

    let deleted = serde_json::to_value(ServerMessage::FeedbackDeleted {
        id: "x1".into(),
        success: true,
    })
    .unwrap();
    assert_eq!(deleted["type"], "feedback_deleted");
    assert_eq!(deleted["success"], true);

    let multi = serde_json::to_value(ServerMessage::RequestMultipleAnnotations {
        message: "go".into(),
    })
    .unwrap();
    assert_eq!(multi["type"], "request_multiple_annotations");
}

#[test]
fn status_response_uses_camel_case_on_the_wire() {
    let value = serde_json::to_value(StatusResponse {
        status: "ok".into(),
        connected_clients: 2,
        pending_feedback: 1,
    })
    .unwrap();
    assert_eq!(value["connectedClients"], 2);
    assert_eq!(value["pendingFeedback"], 1);

    let broadcast = serde_json::to_value(BroadcastResponse {
        success: true,
        client_count: 4,
    })
    .unwrap();
    assert_eq!(broadcast["clientCount"], 4);
}

#[test]
fn feedback_item_tolerates_sparse_payloads() {
    let item: FeedbackItem = serde_json::from_value(json!({
        "id": "x1",
        "description": "only the basics"
    }))
    .unwrap();
    assert_eq!(item.id, "x1");
    assert!(item.element.is_none());
    assert!(item.console_logs.is_empty());

    // Absent screenshot must not serialize as null.
    let serialized = serde_json::to_string(&item).unwrap();
    assert!(!serialized.contains("screenshot"));
}

#[test]
fn feedback_item_round_trips_full_payload() {
    let value = json!({
        "id": "fb-1",
        "timestamp": "2026-08-30T12:00:00Z",
        "url": "http://localhost:5173/",
        "viewport": {"width": 1280, "height": 720, "pixelRatio": 2.0},
        "userAgent": "Mozilla/5.0",
        "element": {
            "selector": "div#app > button:nth-of-type(2)",
            "tag": "button",
            "id": "submit",
            "classes": ["btn", "btn-primary"],
            "text": "Submit",
            "rect": {"x": 10.0, "y": 20.0, "width": 80.0, "height": 32.0}
        },
        "description": "button overlaps the footer",
        "screenshot": "data:image/png;base64,AAAA",
        "consoleLogs": [
            {"type": "error", "timestamp": "2026-08-30T12:00:01Z", "message": "boom"}
        ]
    });

    let item: FeedbackItem = serde_json::from_value(value).unwrap();
    assert_eq!(item.user_agent.as_deref(), Some("Mozilla/5.0"));
    assert_eq!(item.viewport.as_ref().unwrap().pixel_ratio, 2.0);
    assert_eq!(
        item.element.as_ref().unwrap().classes,
        vec!["btn".to_string(), "btn-primary".to_string()]
    );
    assert_eq!(item.console_logs.len(), 1);
    assert_eq!(item.console_logs[0].log_type.as_deref(), Some("error"));

    let back = serde_json::to_value(&item).unwrap();
    assert_eq!(back["userAgent"], "Mozilla/5.0");
    assert_eq!(back["consoleLogs"][0]["type"], "error");
}
