use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use hiddenlink_common::NodeConfig;
use hiddenlink_core::{Node, Packet};
use hiddenlink_daemon::{router, AppState, ErrorResponse, SendMessageResponse, StatusResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tower::ServiceExt;

async fn started_node() -> Node {
    let mut node = Node::new(NodeConfig::new().with_listen_port(0)).await.unwrap();
    node.start().await.unwrap();
    node
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let mut node = started_node().await;
    let app = router(AppState::from_node(&node));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    node.stop().await;
}

#[tokio::test]
async fn test_status_reports_listener_and_addresses() {
    let mut node = started_node().await;
    node.context().add_local_address("me.onion");
    let app = router(AppState::from_node(&node));

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: StatusResponse = read_json(response).await;
    assert_eq!(status.local_addresses, vec!["me.onion".to_string()]);
    assert_eq!(
        status.listen_addr,
        node.listen_addr().map(|a| a.to_string())
    );
    assert_eq!(status.cached_connections, 0);

    node.stop().await;
}

#[tokio::test]
async fn test_send_message_to_local_process() {
    let mut node = started_node().await;
    node.context().add_local_address("me.onion");
    node.register_process("chat");

    let (tx, mut inbox) = unbounded_channel();
    node.application().register_path_listener(
        Arc::new(move |packet: &Packet| {
            let _ = tx.send(packet.clone());
        }),
        "inbox",
    );

    let app = router(AppState::from_node(&node));
    let response = app
        .oneshot(post_json(
            "/api/messages",
            serde_json::json!({
                "address": "me.onion",
                "id": "chat",
                "path": "inbox",
                "type": 5,
                "body": "hello over http",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sent: SendMessageResponse = read_json(response).await;
    assert_eq!(sent.source_address, "me.onion");

    let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.source_packet_id, sent.packet_id);
    assert_eq!(received.message.message_type, 5);
    assert_eq!(received.message.body, b"hello over http".to_vec());

    node.stop().await;
}

#[tokio::test]
async fn test_rejects_bad_addresses() {
    let mut node = started_node().await;
    let app = router(AppState::from_node(&node));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/messages",
            serde_json::json!({ "address": "", "body": "x" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = read_json(response).await;
    assert_eq!(error.code, 400);

    let response = app
        .oneshot(post_json(
            "/api/ping",
            serde_json::json!({ "address": "tooshort.onion" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    node.stop().await;
}

#[tokio::test]
async fn test_ping_returns_packet_id() {
    let mut node = started_node().await;
    node.context().add_local_address("me.onion");
    let app = router(AppState::from_node(&node));

    let response = app
        .oneshot(post_json(
            "/api/ping",
            serde_json::json!({ "address": "me.onion" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = read_json(response).await;
    assert!(!body["packet_id"].as_str().unwrap().is_empty());

    node.stop().await;
}
