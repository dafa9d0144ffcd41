//! Streaming chat engine tests: ack, delta ordering, tool-loop cap, and
//! cancellation.

use async_trait::async_trait;
use krill::chat::{
    CompletionChunk, CompletionRequest, CompletionResponse, ContentBlock, Message, Role,
    StreamCallback,
};
use krill::{Provider, ProviderHandle, Result};
use krill_agent::{AgentConfig, AgentRuntime};
use krill_gateway::chat::{ChatRuns, register_chat_handlers};
use krill_gateway::{EventBus, Protocol, register_builtins};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Streams two text chunks from a foreign thread, then answers with the
/// concatenated text.
struct TextProvider;

#[async_trait]
impl Provider for TextProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-1".into()]
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        self.stream(req, Arc::new(|_| {})).await
    }

    async fn stream(
        &self,
        _req: CompletionRequest,
        cb: StreamCallback,
    ) -> Result<CompletionResponse> {
        // Providers push chunks from their own threads; the queue and
        // notifier must cope.
        let producer = std::thread::spawn(move || {
            cb(CompletionChunk::Text { text: "Hello ".into() });
            cb(CompletionChunk::Text { text: "world".into() });
        });
        let _ = tokio::task::spawn_blocking(move || producer.join()).await;

        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content: vec![ContentBlock::Text { text: "Hello world".into() }],
                created_at: 0,
            },
            model: "mock-1".into(),
            input_tokens: 3,
            output_tokens: 2,
            stop_reason: "end_turn".into(),
        })
    }
}

/// Always requests a tool call, with a small delay per turn.
struct ToolLoopingProvider {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Provider for ToolLoopingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-1".into()]
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        self.stream(req, Arc::new(|_| {})).await
    }

    async fn stream(
        &self,
        _req: CompletionRequest,
        cb: StreamCallback,
    ) -> Result<CompletionResponse> {
        tokio::time::sleep(self.delay).await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        cb(CompletionChunk::ToolUse {
            tool_name: "probe".into(),
            tool_input: json!({"call": call}),
        });
        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content: vec![ContentBlock::ToolUse {
                    id: format!("tu_{call}"),
                    name: "probe".into(),
                    input: json!({"call": call}),
                }],
                created_at: 0,
            },
            model: "mock-1".into(),
            input_tokens: 1,
            output_tokens: 1,
            stop_reason: "tool_use".into(),
        })
    }
}

struct Harness {
    protocol: Arc<Protocol>,
    events: Arc<EventBus>,
    runs: Arc<ChatRuns>,
}

fn harness(provider: Box<dyn Provider>, max_tool_iterations: usize) -> Harness {
    let handle = Arc::new(ProviderHandle::new());
    handle.set(provider);
    let runtime = Arc::new(AgentRuntime::new(
        handle,
        AgentConfig {
            max_tool_iterations,
            ..Default::default()
        },
    ));

    let protocol = Arc::new(Protocol::new());
    register_builtins(&protocol);
    let events = Arc::new(EventBus::default());
    let runs = Arc::new(ChatRuns::new());
    register_chat_handlers(&protocol, events.clone(), runtime, runs.clone());

    Harness { protocol, events, runs }
}

/// Collect events for `run_id` until a terminal chat event arrives.
async fn collect_run_events(
    rx: &mut tokio::sync::broadcast::Receiver<String>,
    run_id: &str,
) -> Vec<Value> {
    let mut collected = Vec::new();
    loop {
        let text = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event bus closed");
        let frame: Value = serde_json::from_str(&text).unwrap();
        if frame["data"]["runId"] != run_id {
            continue;
        }
        let terminal = frame["topic"] == "chat"
            && (frame["data"]["state"] == "final" || frame["data"]["state"] == "error");
        collected.push(frame);
        if terminal {
            return collected;
        }
    }
}

#[tokio::test]
async fn chat_send_acks_and_streams_deltas_before_final() {
    let h = harness(Box::new(TextProvider), 10);
    let mut rx = h.events.subscribe();

    let ack = h
        .protocol
        .dispatch("chat.send", json!({"message": "hi"}))
        .await
        .unwrap();
    let run_id = ack["runId"].as_str().expect("ack carries runId").to_string();
    assert!(run_id.starts_with("run-"));

    let frames = collect_run_events(&mut rx, &run_id).await;

    let deltas: Vec<&Value> = frames
        .iter()
        .filter(|f| f["data"]["state"] == "delta")
        .collect();
    let concatenated: String = deltas
        .iter()
        .map(|f| f["data"]["text"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(concatenated, "Hello world");
    for delta in &deltas {
        assert_eq!(delta["data"]["stream"], "assistant");
    }

    // Exactly one terminal event, after every delta.
    let terminal = frames.last().unwrap();
    assert_eq!(terminal["data"]["state"], "final");
    assert_eq!(terminal["data"]["text"], "Hello world");
    assert_eq!(terminal["data"]["stopReason"], "end_turn");
    assert_eq!(terminal["data"]["model"], "mock-1");
    let terminal_count = frames
        .iter()
        .filter(|f| f["data"]["state"] == "final" || f["data"]["state"] == "error")
        .count();
    assert_eq!(terminal_count, 1);
}

#[tokio::test]
async fn empty_message_is_rejected_without_a_run() {
    let h = harness(Box::new(TextProvider), 10);
    let result = h.protocol.dispatch("chat.send", json!({})).await.unwrap();
    assert_eq!(result["ok"], false);
    assert!(result.get("runId").is_none());
}

#[tokio::test]
async fn tool_loop_cap_reports_max_iterations() {
    let provider = ToolLoopingProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::ZERO,
    };
    let h = harness(Box::new(provider), 2);
    let mut rx = h.events.subscribe();

    let ack = h
        .protocol
        .dispatch("chat.send", json!({"message": "loop forever"}))
        .await
        .unwrap();
    let run_id = ack["runId"].as_str().unwrap().to_string();

    let frames = collect_run_events(&mut rx, &run_id).await;

    let tool_events = frames
        .iter()
        .filter(|f| f["topic"] == "agent" && f["data"]["stream"] == "tool")
        .count();
    assert_eq!(tool_events, 2);

    let terminal = frames.last().unwrap();
    assert_eq!(terminal["data"]["state"], "final");
    assert_eq!(terminal["data"]["stopReason"], "max_iterations");
}

#[tokio::test]
async fn cancel_produces_one_error_terminal() {
    let provider = ToolLoopingProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(20),
    };
    let h = harness(Box::new(provider), 1000);
    let mut rx = h.events.subscribe();

    let ack = h
        .protocol
        .dispatch("chat.send", json!({"message": "slow"}))
        .await
        .unwrap();
    let run_id = ack["runId"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = h
        .protocol
        .dispatch("agent.chat.cancel", json!({"runId": run_id}))
        .await
        .unwrap();
    assert_eq!(cancelled["ok"], true);

    let frames = collect_run_events(&mut rx, &run_id).await;
    let terminal = frames.last().unwrap();
    assert_eq!(terminal["data"]["state"], "error");
    assert!(
        terminal["data"]["error"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("cancel")
    );

    assert_eq!(h.runs.active_count(), 0);
}

#[tokio::test]
async fn agent_chat_aliases_share_the_pipeline() {
    let h = harness(Box::new(TextProvider), 10);
    for method in ["agent.chat", "agent.chat.stream"] {
        let ack = h.protocol.dispatch(method, json!({"message": "hi"})).await.unwrap();
        assert!(ack["runId"].as_str().unwrap().starts_with("run-"));
    }
}

#[tokio::test]
async fn cancelling_unknown_run_reports_false() {
    let h = harness(Box::new(TextProvider), 10);
    let result = h
        .protocol
        .dispatch("agent.chat.cancel", json!({"runId": "run-0-999"}))
        .await
        .unwrap();
    assert_eq!(result["ok"], false);
}
