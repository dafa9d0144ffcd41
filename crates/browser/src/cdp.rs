//! Chrome DevTools Protocol client.
//!
//! One WebSocket per browser. Outbound commands carry a monotonically
//! allocated id; the read loop routes responses back to the matching
//! waiter and unsolicited events to the subscribed handler. When the
//! connection drops, every pending command is failed with
//! `ConnectionClosed` rather than left hanging.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use krill::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Handler for an unsolicited CDP event. One handler per event method;
/// subscribing again replaces the previous handler.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CdpClient {
    url: String,
    next_id: AtomicU64,
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
}

impl CdpClient {
    /// Complete the WebSocket handshake against a
    /// `webSocketDebuggerUrl` and start the background read loop.
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(ws_url))
            .await
            .map_err(|_| {
                Error::with_detail(ErrorKind::Timeout, "CDP connect timed out", ws_url.to_string())
            })?
            .map_err(|e| {
                Error::with_detail(
                    ErrorKind::ConnectionFailed,
                    "Failed to connect to CDP",
                    format!("{ws_url}: {e}"),
                )
            })?;

        let (sink, stream) = ws.split();

        let client = Arc::new(CdpClient {
            url: ws_url.to_string(),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            sink: tokio::sync::Mutex::new(Some(sink)),
        });

        tokio::spawn(Self::read_loop(client.clone(), stream));

        log::info!("CDP connected to {ws_url}");
        Ok(client)
    }

    async fn read_loop(client: Arc<CdpClient>, mut stream: WsStream) {
        while client.connected.load(Ordering::Acquire) {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => client.dispatch_message(&text),
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("CDP connection closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    log::error!("CDP read error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }

        client.connected.store(false, Ordering::Release);
        client.fail_pending();
    }

    /// Route one inbound frame: `id` means response, `method` means
    /// event. Unparseable frames are logged and skipped.
    fn dispatch_message(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to parse CDP message: {e}");
                return;
            }
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let waiter = self.pending.lock().remove(&id);
            let Some(waiter) = waiter else {
                log::warn!("Received CDP response for unknown request: {id}");
                return;
            };

            let outcome = if let Some(error) = value.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("CDP error")
                    .to_string();
                let detail = error.get("data").map(|d| d.to_string());
                Err(match detail {
                    Some(detail) => Error::with_detail(ErrorKind::Browser, message, detail),
                    None => Error::new(ErrorKind::Browser, message),
                })
            } else {
                Ok(value.get("result").cloned().unwrap_or_else(|| json!({})))
            };
            let _ = waiter.send(outcome);
            return;
        }

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let handler = self.handlers.lock().get(method).cloned();
            if let Some(handler) = handler {
                let params = value.get("params").cloned().unwrap_or_else(|| json!({}));
                handler(params);
            }
        }
    }

    /// Fail every waiter still registered. Called on teardown.
    fn fail_pending(&self) {
        let waiters: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(Error::new(
                ErrorKind::ConnectionClosed,
                "CDP connection closed",
            )));
        }
    }

    /// Send a command and await its correlated response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::ConnectionClosed, "CDP client not connected"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let send_result = {
            let mut sink = self.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink
                    .send(Message::Text(message.to_string()))
                    .await
                    .map_err(|e| {
                        Error::with_detail(
                            ErrorKind::ConnectionFailed,
                            "Failed to send CDP command",
                            e.to_string(),
                        )
                    }),
                None => Err(Error::new(ErrorKind::ConnectionClosed, "CDP client not connected")),
            }
        };

        if let Err(e) = send_result {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::new(ErrorKind::ConnectionClosed, "CDP connection closed"))?
    }

    /// Install the handler for an event method, replacing any prior one.
    pub fn subscribe(&self, event: &str, handler: EventHandler) {
        self.handlers.lock().insert(event.to_string(), handler);
        log::debug!("Subscribed to CDP event: {event}");
    }

    pub fn unsubscribe(&self, event: &str) {
        self.handlers.lock().remove(event);
        log::debug!("Unsubscribed from CDP event: {event}");
    }

    /// Close the connection. Idempotent; pending commands are failed
    /// with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        self.fail_pending();
        log::info!("CDP disconnected from {}", self.url);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn ws_url(&self) -> &str {
        &self.url
    }
}
