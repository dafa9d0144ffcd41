//! The streaming chat engine.
//!
//! `chat.send` acks with a run id immediately; a detached task drives
//! the provider through the tool loop. The provider's stream callback
//! (which may run on a foreign thread) pushes chunks into a locked
//! queue and taps a notifier; a consumer task drains the queue and
//! broadcasts one event per chunk. The consumer is joined before the
//! terminal event goes out, so every delta precedes the final.

use crate::events::EventBus;
use crate::protocol::{Protocol, handler};
use krill::chat::{CompletionChunk, CompletionRequest, Message, StreamCallback};
use krill::Result;
use krill_agent::AgentRuntime;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Tracks live chat runs and hands out run ids.
#[derive(Default)]
pub struct ChatRuns {
    counter: AtomicU64,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl ChatRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// `run-<ms>-<n>`: timestamped and unique within the process.
    pub fn generate_run_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("run-{}-{}", krill::timestamp_ms(), count)
    }

    pub fn begin(&self, run_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.active.lock().insert(run_id.to_string(), token.clone());
        token
    }

    /// Request cancellation. Returns false for unknown/finished runs.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.active.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, run_id: &str) {
        self.active.lock().remove(run_id);
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Chunk queue shared between the provider's stream callback and the
/// consumer task. The lock is never held across an await.
struct ChunkQueue {
    chunks: Mutex<VecDeque<CompletionChunk>>,
    done: AtomicBool,
    notify: Notify,
}

impl ChunkQueue {
    fn new() -> Self {
        ChunkQueue {
            chunks: Mutex::new(VecDeque::new()),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Producer side: push and wake the consumer. Safe to call from any
    /// thread.
    fn push(&self, chunk: CompletionChunk) {
        self.chunks.lock().push_back(chunk);
        self.notify.notify_one();
    }

    fn finish(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Drain chunks and broadcast each as an event, in arrival order, until
/// the producer marks the queue done and it runs dry.
async fn consume_chunks(
    queue: Arc<ChunkQueue>,
    run_id: String,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) {
    loop {
        let batch: Vec<CompletionChunk> = {
            let mut chunks = queue.chunks.lock();
            chunks.drain(..).collect()
        };

        for chunk in batch {
            if cancel.is_cancelled() {
                return;
            }
            match chunk {
                CompletionChunk::Text { text } => events.broadcast(
                    "chat",
                    json!({
                        "runId": run_id,
                        "state": "delta",
                        "stream": "assistant",
                        "text": text,
                    }),
                ),
                CompletionChunk::ToolUse { tool_name, tool_input } => events.broadcast(
                    "agent",
                    json!({
                        "runId": run_id,
                        "stream": "tool",
                        "toolName": tool_name,
                        "toolInput": tool_input,
                    }),
                ),
                CompletionChunk::Thinking { text } => events.broadcast(
                    "agent",
                    json!({
                        "runId": run_id,
                        "stream": "thinking",
                        "text": text,
                    }),
                ),
            }
        }

        if queue.done.load(Ordering::Acquire) && queue.chunks.lock().is_empty() {
            return;
        }

        queue.notify.notified().await;
    }
}

/// Detached completion task: runs the tool loop, then emits exactly one
/// terminal event for the run.
async fn run_chat_completion(
    run_id: String,
    message_text: String,
    events: Arc<EventBus>,
    runtime: Arc<AgentRuntime>,
    runs: Arc<ChatRuns>,
    cancel: CancellationToken,
) {
    let queue = Arc::new(ChunkQueue::new());

    let consumer = tokio::spawn(consume_chunks(
        queue.clone(),
        run_id.clone(),
        events.clone(),
        cancel.clone(),
    ));

    log::info!("chat.send run={} msg_len={}", run_id, message_text.len());

    let producer_queue = queue.clone();
    let stream_cb: StreamCallback = Arc::new(move |chunk| producer_queue.push(chunk));

    let req = CompletionRequest {
        messages: vec![Message::user_text(message_text)],
        ..Default::default()
    };
    let max_iterations = runtime.config().max_tool_iterations;
    let result = runtime
        .process_with_tools_stream(req, stream_cb, max_iterations, Some(cancel.clone()))
        .await;

    // Let the consumer flush everything before the terminal event.
    queue.finish();
    let _ = consumer.await;

    match result {
        Ok(response) => {
            let text = response.message.text();
            log::info!(
                "chat.send run={} completed: {} chars, model={}",
                run_id,
                text.len(),
                response.model
            );
            events.broadcast(
                "chat",
                json!({
                    "runId": run_id,
                    "state": "final",
                    "text": text,
                    "model": response.model,
                    "inputTokens": response.input_tokens,
                    "outputTokens": response.output_tokens,
                    "stopReason": response.stop_reason,
                }),
            );
        }
        Err(e) => {
            log::error!("chat.send run={} error: {}", run_id, e.what());
            events.broadcast(
                "chat",
                json!({
                    "runId": run_id,
                    "state": "error",
                    "error": e.what(),
                }),
            );
        }
    }

    runs.finish(&run_id);
}

/// The `chat.send` handler body: ack with a run id, spawn the work.
async fn handle_chat_send(
    params: Value,
    events: Arc<EventBus>,
    runtime: Arc<AgentRuntime>,
    runs: Arc<ChatRuns>,
) -> Result<Value> {
    let message_text = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if message_text.is_empty() {
        return Ok(json!({"ok": false, "error": "message is required"}));
    }

    let run_id = runs.generate_run_id();
    let cancel = runs.begin(&run_id);

    tokio::spawn(run_chat_completion(
        run_id.clone(),
        message_text,
        events,
        runtime,
        runs,
        cancel,
    ));

    Ok(json!({"runId": run_id}))
}

/// Register `chat.send` and its `agent.chat` / `agent.chat.stream`
/// aliases, plus `agent.chat.cancel`.
pub fn register_chat_handlers(
    protocol: &Protocol,
    events: Arc<EventBus>,
    runtime: Arc<AgentRuntime>,
    runs: Arc<ChatRuns>,
) {
    for (method, description, group) in [
        ("chat.send", "Send a chat message and receive streaming response", "chat"),
        ("agent.chat", "Send a message to the agent and get a response", "agent"),
        ("agent.chat.stream", "Stream agent chat response", "agent"),
    ] {
        let events = events.clone();
        let runtime = runtime.clone();
        let runs = runs.clone();
        protocol.register_method(
            method,
            handler(move |params| {
                handle_chat_send(params, events.clone(), runtime.clone(), runs.clone())
            }),
            description,
            group,
        );
    }

    let cancel_runs = runs.clone();
    protocol.register_method(
        "agent.chat.cancel",
        handler(move |params| {
            let runs = cancel_runs.clone();
            async move {
                let run_id = params.get("runId").and_then(Value::as_str).unwrap_or_default();
                if run_id.is_empty() {
                    return Ok(json!({"ok": false, "error": "runId is required"}));
                }
                let cancelled = runs.cancel(run_id);
                Ok(json!({"ok": cancelled, "runId": run_id}))
            }
        }),
        "Cancel an in-progress agent response",
        "agent",
    );

    log::info!("Registered chat handlers: chat.send, agent.chat, agent.chat.stream");
}
