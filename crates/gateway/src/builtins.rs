//! The built-in method surface.
//!
//! Every method the gateway exposes is registered at startup with a
//! stub handler, so `gateway.methods` reflects the complete surface
//! before the subsystems come online. Real handlers then overwrite the
//! stubs they implement. Stubs answer successfully with
//! `{status:"not_implemented"}`.

use crate::protocol::{MethodHandler, Protocol, handler};
use serde_json::json;

fn stub(method_name: &str) -> MethodHandler {
    let name = method_name.to_string();
    handler(move |_params| {
        let name = name.clone();
        async move {
            Ok(json!({
                "status": "not_implemented",
                "method": name,
                "message": "This method is registered but not yet connected to a subsystem.",
            }))
        }
    })
}

fn register_group(protocol: &Protocol, group: &str, methods: &[(&str, &str)]) {
    for (name, description) in methods {
        protocol.register_method(name, stub(name), description, group);
    }
}

/// Register a stub for every method in the gateway surface.
pub fn register_builtins(protocol: &Protocol) {
    register_group(protocol, "gateway", &[
        ("gateway.info", "Return gateway version and capabilities"),
        ("gateway.ping", "Health check ping"),
        ("gateway.status", "Return gateway runtime status (uptime, connections, load)"),
        ("gateway.methods", "List all registered RPC methods"),
        ("gateway.subscribe", "Subscribe to server-sent events by topic"),
        ("gateway.unsubscribe", "Unsubscribe from server-sent events"),
        ("gateway.shutdown", "Initiate graceful server shutdown"),
        ("gateway.reload", "Reload gateway configuration"),
        ("gateway.metrics", "Return gateway metrics (requests, latencies, errors)"),
        ("gateway.logs", "Stream or query recent gateway logs"),
    ]);

    register_group(protocol, "session", &[
        ("session.create", "Create a new user session"),
        ("session.get", "Get session details by id"),
        ("session.list", "List active sessions"),
        ("session.destroy", "Destroy / end a session"),
        ("session.heartbeat", "Keep a session alive"),
        ("session.update", "Update session metadata"),
        ("session.context.set", "Set session context variables"),
        ("session.context.get", "Get session context variables"),
        ("session.context.clear", "Clear session context"),
        ("session.history", "Get session message history"),
    ]);

    register_group(protocol, "channel", &[
        ("channel.list", "List available communication channels"),
        ("channel.connect", "Connect / enable a channel"),
        ("channel.disconnect", "Disconnect / disable a channel"),
        ("channel.status", "Get channel connection status"),
        ("channel.send", "Send a message through a channel"),
        ("channel.receive", "Poll for messages from a channel"),
        ("channel.configure", "Update channel configuration"),
        ("channel.telegram.webhook", "Register Telegram webhook"),
        ("channel.discord.setup", "Set up Discord bot connection"),
        ("channel.slack.setup", "Set up Slack bot connection"),
        ("channel.whatsapp.setup", "Set up WhatsApp Business API connection"),
        ("channel.sms.send", "Send an SMS via Twilio"),
    ]);

    register_group(protocol, "tool", &[
        ("tool.list", "List all registered tools"),
        ("tool.execute", "Execute a tool by name with params"),
        ("tool.register", "Register a new dynamic tool"),
        ("tool.unregister", "Unregister a dynamic tool"),
        ("tool.describe", "Get tool schema and description"),
        ("tool.enable", "Enable a disabled tool"),
        ("tool.disable", "Disable a tool without unregistering"),
        ("tool.shell.exec", "Execute a shell command"),
        ("tool.file.read", "Read file contents"),
        ("tool.file.write", "Write file contents"),
        ("tool.file.list", "List directory contents"),
        ("tool.file.search", "Search files by pattern"),
        ("tool.http.request", "Make an HTTP request"),
        ("tool.code.run", "Execute code in a sandboxed runtime"),
        ("tool.code.analyze", "Analyze code for issues"),
    ]);

    register_group(protocol, "memory", &[
        ("memory.store", "Store a memory/fact"),
        ("memory.recall", "Recall memories by semantic query"),
        ("memory.search", "Search memories with filters"),
        ("memory.delete", "Delete a specific memory"),
        ("memory.list", "List stored memories"),
        ("memory.clear", "Clear all memories for a scope"),
        ("memory.stats", "Return memory store statistics"),
        ("memory.embed", "Generate embedding for text"),
        ("memory.index.rebuild", "Rebuild the vector index"),
        ("memory.rag.query", "RAG query: retrieve context and generate response"),
    ]);

    register_group(protocol, "browser", &[
        ("browser.open", "Open a URL in headless browser"),
        ("browser.close", "Close a browser page"),
        ("browser.navigate", "Navigate to a URL"),
        ("browser.screenshot", "Take a screenshot"),
        ("browser.content", "Get page content as text/html"),
        ("browser.click", "Click an element on the page"),
        ("browser.type", "Type text into an input field"),
        ("browser.fill", "Fill a form field with a value"),
        ("browser.evaluate", "Evaluate JavaScript on the page"),
        ("browser.wait", "Wait for a selector or condition"),
        ("browser.scroll", "Scroll the page"),
        ("browser.pdf", "Export page as PDF"),
        ("browser.cookies.get", "Get browser cookies"),
        ("browser.cookies.set", "Set browser cookies"),
    ]);

    register_group(protocol, "provider", &[
        ("provider.list", "List configured AI providers"),
        ("provider.chat", "Send a chat completion request"),
        ("provider.chat.stream", "Stream a chat completion"),
        ("provider.models", "List available models for a provider"),
        ("provider.embed", "Generate embeddings via a provider"),
        ("provider.status", "Check provider availability"),
        ("provider.configure", "Update provider configuration at runtime"),
        ("provider.usage", "Get token/cost usage statistics"),
    ]);

    register_group(protocol, "plugin", &[
        ("plugin.list", "List installed plugins"),
        ("plugin.install", "Install a plugin from path or URL"),
        ("plugin.uninstall", "Uninstall a plugin"),
        ("plugin.enable", "Enable an installed plugin"),
        ("plugin.disable", "Disable a plugin"),
        ("plugin.configure", "Update plugin settings"),
        ("plugin.call", "Call an exported plugin function"),
        ("plugin.status", "Get plugin runtime status"),
    ]);

    register_group(protocol, "agent", &[
        ("agent.chat", "Send a message to the agent and get a response"),
        ("agent.chat.stream", "Stream agent chat response"),
        ("agent.chat.cancel", "Cancel an in-progress agent response"),
        ("agent.system_prompt.get", "Get the current system prompt"),
        ("agent.system_prompt.set", "Set the system prompt"),
        ("agent.thinking.set", "Set thinking mode (none, basic, extended)"),
        ("agent.thinking.get", "Get current thinking mode"),
        ("agent.model.set", "Set the active model"),
        ("agent.model.get", "Get the active model"),
        ("agent.conversation.create", "Create a new conversation"),
        ("agent.conversation.list", "List conversations"),
        ("agent.conversation.get", "Get conversation details and messages"),
        ("agent.conversation.delete", "Delete a conversation"),
        ("agent.conversation.rename", "Rename a conversation"),
    ]);

    register_group(protocol, "cron", &[
        ("cron.list", "List scheduled tasks"),
        ("cron.create", "Create a scheduled task"),
        ("cron.delete", "Delete a scheduled task"),
        ("cron.enable", "Enable a scheduled task"),
        ("cron.disable", "Disable a scheduled task"),
        ("cron.trigger", "Manually trigger a scheduled task"),
        ("cron.status", "Get cron scheduler status"),
    ]);

    register_group(protocol, "config", &[
        ("config.get", "Get configuration value by key"),
        ("config.set", "Set configuration value"),
        ("config.patch", "Apply config patches with optimistic concurrency"),
        ("config.list", "List all configuration keys"),
        ("config.reset", "Reset configuration to defaults"),
        ("config.export", "Export full configuration as JSON"),
        ("config.import", "Import configuration from JSON"),
    ]);

    // chat.send shares the agent group's chat pipeline but is its own
    // top-level method, called by the bridge for every user message.
    protocol.register_method(
        "chat.send",
        stub("chat.send"),
        "Send a chat message and receive streaming response",
        "chat",
    );

    log::info!("Registered {} built-in method stubs", protocol.len());
}
