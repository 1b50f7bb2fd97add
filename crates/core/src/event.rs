//! Observability events emitted while an agent run progresses.
//!
//! The agent loop calls an [`EventSink`] opportunistically. Sinks are one-way:
//! nothing a sink does can influence the run, and [`NoopSink`] is a valid sink.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::message::Message;

/// Named events pushed to clients during a run.
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// About to call the model. `step` is the label clients display.
    Thinking {
        step: String,
        iteration: u32,
        model: String,
    },

    /// Non-empty assistant text.
    Thought { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Turns appended since the previous history event.
    ConversationHistory { messages: Vec<Message> },

    /// Final answer of an interactive request.
    ChatResponse { response: String, thinking_time: f64 },

    /// The interactive request failed.
    Error { message: String, thinking_time: f64 },
}

impl AgentEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ConversationHistory { .. } => "conversation_history",
            Self::ChatResponse { .. } => "chat_response",
            Self::Error { .. } => "error",
        }
    }
}

/// One-way event emitter.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// Forwards events into an unbounded channel (one live client).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        // A disconnected client must not affect the run.
        let _ = self.sender.send(event);
    }
}
