//! Shared test helpers for agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dewey_core::error::{ProviderError, ToolError};
use dewey_core::event::{AgentEvent, EventSink};
use dewey_core::message::Conversation;
use dewey_core::model_gateway::ModelGateway;
use dewey_core::provider::ToolDefinition;
use dewey_core::reply::Reply;
use dewey_core::tool::{ParamType, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
use tokio_util::sync::CancellationToken;

/// A gateway that returns a scripted sequence of replies.
///
/// Once the script runs out it keeps returning the fallback reply, or a
/// network error if there is none.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Reply, ProviderError>>>,
    fallback: Option<Reply>,
    calls: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Reply, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    /// Return the same reply forever.
    pub fn repeating(reply: Reply) -> Self {
        let mut gateway = Self::new(vec![]);
        gateway.fallback = Some(reply);
        gateway
    }

    /// Cancel `token` once `calls` model calls have been made.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(
        &self,
        _model: &str,
        _conversation: &Conversation,
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<Reply, ProviderError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }
        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(ProviderError::Network(format!(
                "ScriptedGateway: no more replies (call #{count})"
            ))),
        }
    }
}

/// Collects every emitted event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.event_type()).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(format!("call_{name}"), name, args)
}

/// A registry holding only the calculator.
pub fn calculator_registry() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(dewey_tools::CalculatorTool)).unwrap();
    tools
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "boom".into(),
        })
    }
}

/// Echoes `text` after sleeping `delay_ms`.
pub struct SlowEchoTool;

#[async_trait]
impl Tool for SlowEchoTool {
    fn name(&self) -> &str {
        "slow_echo"
    }
    fn description(&self) -> &str {
        "Echo text after a delay"
    }
    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .param("text", ParamType::String, "Text to echo")
            .optional("delay_ms", ParamType::Integer, "Delay before answering")
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or_default()))
    }
}
