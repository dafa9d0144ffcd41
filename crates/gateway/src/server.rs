//! The gateway WebSocket server.
//!
//! One route, text frames only. Each connection gets a send task fed by
//! an mpsc channel (responses) and the broadcast bus (events); the
//! receive loop dispatches each request as its own task, so responses
//! may complete out of order while the frame `id` keeps correlation.

use crate::events::EventBus;
use crate::frames::Frame;
use crate::observability::GatewayObservability;
use crate::protocol::Protocol;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::any;
use futures_util::{SinkExt, StreamExt};
use krill::{Error, ErrorKind, Result};
use krill_channels::UnauthorizedFloodGuard;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PORT: u16 = 18789;
pub const PORT_SEARCH_RANGE: u16 = 100;
pub const PROTOCOL_VERSION: u32 = 1;

pub struct ServerState {
    pub protocol: Arc<Protocol>,
    pub events: Arc<EventBus>,
    pub observability: Arc<GatewayObservability>,
    pub shutdown: CancellationToken,
    running: AtomicBool,
    connections: AtomicUsize,
    bound_port: AtomicU16,
    auth_token: Option<String>,
    flood_threshold: u32,
}

impl ServerState {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub struct GatewayServer {
    state: Arc<ServerState>,
}

impl GatewayServer {
    pub fn new(
        protocol: Arc<Protocol>,
        events: Arc<EventBus>,
        observability: Arc<GatewayObservability>,
        auth_token: Option<String>,
        flood_threshold: u32,
    ) -> Self {
        GatewayServer {
            state: Arc::new(ServerState {
                protocol,
                events,
                observability,
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(false),
                connections: AtomicUsize::new(0),
                bound_port: AtomicU16::new(0),
                auth_token,
                flood_threshold,
            }),
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }

    /// The port actually bound, once running.
    pub fn bound_port(&self) -> u16 {
        self.state.bound_port.load(Ordering::Acquire)
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }

    /// Bind `preferred_port` (searching upward when busy), then serve
    /// until shutdown.
    pub async fn run(&self, preferred_port: u16) -> Result<()> {
        let port = krill::ports::find_free_port(preferred_port, PORT_SEARCH_RANGE).ok_or_else(
            || {
                Error::with_detail(
                    ErrorKind::Io,
                    "No free port for gateway listener",
                    format!("searched {preferred_port}..{}", preferred_port as u32 + PORT_SEARCH_RANGE as u32),
                )
            },
        )?;

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| {
                Error::with_detail(ErrorKind::Io, "Failed to bind gateway listener", e.to_string())
            })?;

        self.state.bound_port.store(port, Ordering::Release);
        self.state.running.store(true, Ordering::Release);
        log::info!("Gateway listening on ws://127.0.0.1:{port}");

        let router = Router::new()
            .route("/", any(ws_upgrade))
            .with_state(self.state.clone());

        let shutdown = self.state.shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        self.state.running.store(false, Ordering::Release);
        served.map_err(|e| {
            Error::with_detail(ErrorKind::Io, "Gateway server failed", e.to_string())
        })
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    // With no token configured, every connection is authorized. A bad
    // token still upgrades; its requests are rejected and counted by
    // the flood guard.
    let authorized = match &state.auth_token {
        Some(expected) => query.get("token").map(|t| t == expected).unwrap_or(false),
        None => true,
    };
    ws.on_upgrade(move |socket| handle_connection(socket, state, authorized))
}

async fn handle_connection(socket: WebSocket, state: Arc<ServerState>, authorized: bool) {
    state.connections.fetch_add(1, Ordering::AcqRel);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(100);
    let mut event_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Ok(text) => {
                            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection lagged, dropped {n} event(s)");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let flood = UnauthorizedFloodGuard::new(state.flood_threshold);

    while let Some(message) = ws_receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed frames terminate the connection.
                log::warn!("Malformed frame, closing connection: {e}");
                break;
            }
        };

        let Frame::Request { id, method, params } = frame else {
            log::warn!("Unexpected non-request frame from client, closing connection");
            break;
        };

        state.observability.record_request();

        if !authorized {
            let err = Error::new(ErrorKind::Unauthorized, "Unauthorized");
            state.observability.record_error();
            if let Ok(rendered) = serde_json::to_string(&Frame::response_err(&id, &err)) {
                let _ = tx.send(rendered).await;
            }
            if flood.record_rejection() {
                log::warn!("Flood threshold crossed, closing connection");
                break;
            }
            continue;
        }

        // Dispatch off this loop so one slow handler cannot stall the
        // connection. Responses carry the request id for correlation.
        let protocol = state.protocol.clone();
        let observability = state.observability.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let frame = match protocol.dispatch(&method, params).await {
                Ok(result) => Frame::response_ok(&id, result),
                Err(e) => {
                    observability.record_error();
                    Frame::response_err(&id, &e)
                }
            };
            if let Ok(rendered) = serde_json::to_string(&frame) {
                let _ = tx.send(rendered).await;
            }
        });
    }

    drop(tx);
    let _ = send_task.await;
    state.connections.fetch_sub(1, Ordering::AcqRel);
}
