//! CDP client tests against an in-process WebSocket server standing in
//! for Chrome.

use futures_util::{SinkExt, StreamExt};
use krill::ErrorKind;
use krill_browser::CdpClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Spawn a fake DevTools endpoint. `behavior` receives each parsed
/// command and returns the frames to send back, or `None` to close the
/// connection immediately.
async fn spawn_fake_chrome<F>(behavior: F) -> String
where
    F: Fn(Value) -> Option<Vec<Value>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut sink, mut reader) = ws.split();

        while let Some(Ok(msg)) = reader.next().await {
            if let Message::Text(text) = msg {
                let command: Value = serde_json::from_str(&text).unwrap();
                match behavior(command) {
                    Some(replies) => {
                        for reply in replies {
                            sink.send(Message::Text(reply.to_string())).await.unwrap();
                        }
                    }
                    None => break,
                }
            }
        }
        // Dropping the sink closes the connection.
    });

    format!("ws://{addr}")
}

#[tokio::test]
async fn evaluate_round_trip() {
    let url = spawn_fake_chrome(|command| {
        assert_eq!(command["method"], "Runtime.evaluate");
        assert_eq!(command["params"]["expression"], "1+1");
        Some(vec![json!({
            "id": command["id"],
            "result": {"result": {"type": "number", "value": 2}},
        })])
    })
    .await;

    let client = CdpClient::connect(&url).await.unwrap();
    let result = client
        .send_command(
            "Runtime.evaluate",
            json!({"expression": "1+1", "returnByValue": true}),
        )
        .await
        .unwrap();
    assert_eq!(result["result"]["value"], 2);

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn responses_are_correlated_by_id() {
    // Reply to each command, plus an unsolicited event before the
    // response to make sure routing keys off the id.
    let url = spawn_fake_chrome(|command| {
        Some(vec![
            json!({"method": "Page.frameNavigated", "params": {"frame": {}}}),
            json!({"id": command["id"], "result": {"echo": command["method"]}}),
        ])
    })
    .await;

    let client = CdpClient::connect(&url).await.unwrap();
    let a = client.send_command("First.method", json!({})).await.unwrap();
    let b = client.send_command("Second.method", json!({})).await.unwrap();
    assert_eq!(a["echo"], "First.method");
    assert_eq!(b["echo"], "Second.method");
}

#[tokio::test]
async fn cdp_error_becomes_browser_error_with_detail() {
    let url = spawn_fake_chrome(|command| {
        Some(vec![json!({
            "id": command["id"],
            "error": {"code": -32000, "message": "Node not found", "data": "nodeId 7"},
        })])
    })
    .await;

    let client = CdpClient::connect(&url).await.unwrap();
    let err = client.send_command("DOM.describeNode", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Browser);
    assert!(err.what().contains("Node not found"));
    assert!(err.what().contains("nodeId 7"));
}

#[tokio::test]
async fn server_close_fails_pending_command_with_connection_closed() {
    // The server closes the socket instead of answering.
    let url = spawn_fake_chrome(|_| None).await;

    let client = CdpClient::connect(&url).await.unwrap();
    let err = client
        .send_command("Runtime.evaluate", json!({"expression": "1"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    // Later sends fail immediately.
    let err = client.send_command("Page.enable", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
}

#[tokio::test]
async fn events_reach_the_subscribed_handler() {
    let url = spawn_fake_chrome(|command| {
        Some(vec![
            json!({"method": "Page.loadEventFired", "params": {"timestamp": 123.0}}),
            json!({"id": command["id"], "result": {}}),
        ])
    })
    .await;

    let client = CdpClient::connect(&url).await.unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = seen.clone();
    client.subscribe(
        "Page.loadEventFired",
        Arc::new(move |params| {
            assert_eq!(params["timestamp"], 123.0);
            seen2.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client.send_command("Page.enable", json!({})).await.unwrap();
    // The event frame is written before the response, so it has been
    // dispatched by the time the command resolves.
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let url = spawn_fake_chrome(|command| Some(vec![json!({"id": command["id"], "result": {}})])).await;

    let client = CdpClient::connect(&url).await.unwrap();
    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected());
}
