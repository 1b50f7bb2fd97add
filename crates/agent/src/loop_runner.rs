//! The agent reasoning loop implementation.

use std::sync::Arc;

use dewey_config::AppConfig;
use dewey_core::error::Error;
use dewey_core::event::{AgentEvent, EventSink};
use dewey_core::message::{Conversation, Message};
use dewey_core::model_gateway::ModelGateway;
use dewey_core::persona::{thought_nudge, Persona, ReflectionPolicy, TOOL_REFLECTION_PROMPT};
use dewey_core::reply::{AnswerDelimiter, Reply};
use dewey_core::tool::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix on the answer of a run that hit the iteration cap.
pub const EXHAUSTED_MARKER: &str = "[max iterations reached]";

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Starting,
    Iterating,
    Answered,
    Exhausted,
    /// Only observed through an `Err` from [`AgentLoop::run`].
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answered | Self::Exhausted | Self::Failed)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// `Answered` or `Exhausted`
    pub state: LoopState,

    /// Final answer, or the marked partial answer when exhausted
    pub answer: String,

    /// Model calls made
    pub iterations: u32,

    /// Tool calls dispatched
    pub tool_calls_made: usize,
}

/// The agent loop: drives model calls and tool dispatch until the model
/// answers, stalls, or the iteration cap is hit.
pub struct AgentLoop {
    /// The model gateway to use
    gateway: Arc<dyn ModelGateway>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// The model to use
    model: String,

    /// System prompt synthesized into conversations that lack one
    persona: Persona,

    /// Hard cap on model calls per run
    max_iterations: u32,

    /// Whether to nudge the model to review tool results
    reflection: ReflectionPolicy,

    /// Tag wrapping the final answer
    answer_tag: String,
}

impl AgentLoop {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            tools,
            model: model.into(),
            persona: Persona::default(),
            max_iterations: 100,
            reflection: ReflectionPolicy::Never,
            answer_tag: AnswerDelimiter::DEFAULT_TAG.into(),
        }
    }

    /// Build a loop with the `[agent]` settings from the configuration.
    pub fn from_config(
        config: &AppConfig,
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let agent = &config.agent;
        let persona = match &agent.system_prompt {
            Some(prompt) => Persona::custom(prompt.clone()),
            None => Persona::default_for_tag(&agent.answer_tag),
        };
        Self::new(gateway, tools, config.default_model.clone())
            .with_persona(persona)
            .with_max_iterations(agent.max_iterations)
            .with_reflection(agent.reflection)
            .with_answer_tag(agent.answer_tag.clone())
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_reflection(mut self, policy: ReflectionPolicy) -> Self {
        self.reflection = policy;
        self
    }

    /// Tag the model wraps its final answer in (default `reply`).
    pub fn with_answer_tag(mut self, tag: impl Into<String>) -> Self {
        self.answer_tag = tag.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop for one user message.
    ///
    /// Turns are appended to `conversation` as the run progresses, so on
    /// `Err` the conversation still holds everything up to the failure.
    /// Cancellation is honoured before each model call, never mid-iteration.
    pub async fn run(
        &self,
        message: &str,
        conversation: &mut Conversation,
        events: &dyn EventSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<AgentOutcome, Error> {
        let delimiter = AnswerDelimiter::new(&self.answer_tag).map_err(|e| Error::Config {
            message: format!("invalid answer tag '{}': {e}", self.answer_tag),
        })?;
        let manifest = self.tools.manifest();
        let tools = (!manifest.is_empty()).then_some(manifest.as_slice());

        let mut state = LoopState::Starting;
        let mut emitted = conversation.len();
        let mut previous_thought: Option<String> = None;
        let mut tool_calls_made = 0;

        info!(
            conversation_id = %conversation.id,
            model = %self.model,
            max_iterations = self.max_iterations,
            "Agent run started"
        );

        for iteration in 1..=self.max_iterations {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(conversation_id = %conversation.id, iteration, "Agent run cancelled");
                return Err(Error::Cancelled);
            }

            if state == LoopState::Starting {
                if conversation.ensure_system(&self.persona.system_prompt) {
                    // Head insertion shifts every index; resend the whole history once.
                    emitted = 0;
                }
                conversation.push(Message::user(message));
                state = LoopState::Iterating;
            }

            events.emit(AgentEvent::Thinking {
                step: format!("Executing step {iteration}"),
                iteration,
                model: self.model.clone(),
            });
            debug!(conversation_id = %conversation.id, iteration, "Calling model");

            let Reply { text, tool_calls } = self
                .gateway
                .complete(&self.model, conversation, tools)
                .await
                .map_err(|e| {
                    warn!(conversation_id = %conversation.id, iteration, error = %e, "Model call failed");
                    Error::Provider(e)
                })?;

            if !text.trim().is_empty() {
                events.emit(AgentEvent::Thought {
                    content: text.clone(),
                });
            }
            conversation.push(Message::assistant_with_tools(text.clone(), tool_calls.clone()));

            if !tool_calls.is_empty() {
                for call in &tool_calls {
                    events.emit(AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                    debug!(iteration, tool = %call.name, "Dispatching tool call");

                    let result = self
                        .tools
                        .dispatch_result(&call.name, call.arguments.clone())
                        .await;

                    events.emit(AgentEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: result.output.clone(),
                        success: result.success,
                    });
                    conversation.push(Message::tool_result(call.id.clone(), result.output));
                    tool_calls_made += 1;
                }
                if self.reflection == ReflectionPolicy::Always {
                    conversation.push(Message::reflection(TOOL_REFLECTION_PROMPT));
                }
            } else if let Some(answer) = delimiter.extract(&text) {
                emit_history(conversation, &mut emitted, events);
                info!(conversation_id = %conversation.id, iteration, "Agent answered");
                return Ok(AgentOutcome {
                    state: LoopState::Answered,
                    answer,
                    iterations: iteration,
                    tool_calls_made,
                });
            } else if let Some(previous) = previous_thought
                .as_deref()
                .filter(|p| !p.trim().is_empty() && text.trim().is_empty())
            {
                // Stall heuristic: non-empty text followed by an empty reply means done.
                let answer = previous.trim().to_string();
                emit_history(conversation, &mut emitted, events);
                info!(conversation_id = %conversation.id, iteration, "Agent stalled; using previous thought");
                return Ok(AgentOutcome {
                    state: LoopState::Answered,
                    answer,
                    iterations: iteration,
                    tool_calls_made,
                });
            } else {
                previous_thought = Some(text);
                conversation.push(Message::reflection(thought_nudge(delimiter.tag())));
            }

            emit_history(conversation, &mut emitted, events);
        }

        let last = conversation.last_assistant_text().unwrap_or_default();
        warn!(
            conversation_id = %conversation.id,
            max_iterations = self.max_iterations,
            "Agent hit max iterations"
        );
        Ok(AgentOutcome {
            state: LoopState::Exhausted,
            answer: format!("{EXHAUSTED_MARKER} {last}"),
            iterations: self.max_iterations,
            tool_calls_made,
        })
    }
}

/// Emit the turns appended since the last emission.
fn emit_history(conversation: &Conversation, emitted: &mut usize, events: &dyn EventSink) {
    let start = (*emitted).min(conversation.len());
    if start < conversation.len() {
        events.emit(AgentEvent::ConversationHistory {
            messages: conversation.messages[start..].to_vec(),
        });
    }
    *emitted = conversation.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        calculator_registry, make_tool_call, FailingTool, RecordingSink, ScriptedGateway, SlowEchoTool,
    };
    use dewey_core::error::ProviderError;
    use dewey_core::event::NoopSink;
    use dewey_core::message::Role;
    use std::time::Duration;

    fn agent(gateway: Arc<ScriptedGateway>, tools: ToolRegistry) -> AgentLoop {
        AgentLoop::new(gateway, Arc::new(tools), "mock-model")
    }

    fn roles(conversation: &Conversation) -> Vec<Role> {
        conversation.messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn two_plus_two_end_to_end() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(vec![make_tool_call("calculator", serde_json::json!({"expression": "2+2"}))]),
            Reply::text("<reply>4</reply>"),
        ]));
        let agent = agent(gateway.clone(), calculator_registry());
        let mut conversation = Conversation::new();

        let outcome = agent
            .run("What is 2+2?", &mut conversation, &NoopSink, None)
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Answered);
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls_made, 1);
        assert_eq!(
            roles(&conversation),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(conversation.messages[1].content, "What is 2+2?");
        assert_eq!(conversation.messages[2].tool_calls[0].name, "calculator");
        assert_eq!(conversation.messages[3].content, "4");
        assert_eq!(conversation.messages[4].content, "<reply>4</reply>");
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn from_config_applies_agent_settings() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 2;
        config.agent.answer_tag = "answer".into();
        let gateway = Arc::new(ScriptedGateway::repeating(Reply::text("<answer> x </answer>")));
        let agent = AgentLoop::from_config(&config, gateway, Arc::new(ToolRegistry::new()));
        assert_eq!(agent.max_iterations(), 2);
        assert_eq!(agent.model(), config.default_model);

        let mut conversation = Conversation::new();
        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.answer, "x");
        assert!(conversation.messages[0].content.contains("<answer></answer>"));
    }

    #[tokio::test]
    async fn exhausts_at_exactly_n_calls() {
        for n in [1, 3, 7] {
            let gateway = Arc::new(ScriptedGateway::repeating(Reply::text("still thinking")));
            let agent = agent(gateway.clone(), ToolRegistry::new()).with_max_iterations(n);
            let mut conversation = Conversation::new();

            let outcome = agent.run("hi", &mut conversation, &NoopSink, None).await.unwrap();

            assert_eq!(outcome.state, LoopState::Exhausted);
            assert_eq!(outcome.iterations, n);
            assert_eq!(gateway.call_count(), n as usize);
            assert_eq!(outcome.answer, "[max iterations reached] still thinking");
            let assistant_turns = conversation
                .messages
                .iter()
                .filter(|m| m.role == Role::Assistant)
                .count();
            assert_eq!(assistant_turns, n as usize);
        }
    }

    #[tokio::test]
    async fn delimiter_extraction_is_trimmed_and_case_insensitive() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Reply::text(
            "blah <REPLY>  42 \n</Reply> blah",
        )]));
        let agent = agent(gateway, ToolRegistry::new());
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Answered);
        assert_eq!(outcome.answer, "42");
    }

    #[tokio::test]
    async fn custom_answer_tag() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::text("<reply>not this</reply>"),
            Reply::text("<answer>this</answer>"),
        ]));
        let agent = agent(gateway, ToolRegistry::new()).with_answer_tag("answer");
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.answer, "this");
        assert_eq!(outcome.iterations, 2);
    }

    /// The stall rule is a heuristic: a model that goes quiet after saying
    /// something is taken to be done.
    #[tokio::test]
    async fn stall_returns_previous_thought() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::text("partial answer"),
            Reply::text(""),
        ]));
        let agent = agent(gateway, ToolRegistry::new());
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Answered);
        assert_eq!(outcome.answer, "partial answer");
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn whitespace_only_reply_counts_as_stall() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::text("  the gist  "),
            Reply::text(" \n "),
        ]));
        let agent = agent(gateway, ToolRegistry::new());
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.answer, "the gist");
    }

    #[tokio::test]
    async fn empty_replies_alone_do_not_stall() {
        let gateway = Arc::new(ScriptedGateway::repeating(Reply::text("")));
        let agent = agent(gateway, ToolRegistry::new()).with_max_iterations(4);
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Exhausted);
        assert_eq!(outcome.iterations, 4);
    }

    #[tokio::test]
    async fn thought_gets_a_reflection_nudge() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::text("let me think"),
            Reply::text("<reply>done</reply>"),
        ]));
        let agent = agent(gateway, ToolRegistry::new());
        let mut conversation = Conversation::new();

        agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(
            roles(&conversation),
            vec![Role::System, Role::User, Role::Assistant, Role::Reflection, Role::Assistant]
        );
        assert!(conversation.messages[3].content.contains("<reply></reply>"));
    }

    #[tokio::test]
    async fn tool_calls_take_precedence_over_answer() {
        let mut reply = Reply::text("<reply>too early</reply>");
        reply.tool_calls = vec![make_tool_call("calculator", serde_json::json!({"expression": "1+1"}))];
        let gateway = Arc::new(ScriptedGateway::new(vec![reply, Reply::text("<reply>2</reply>")]));
        let agent = agent(gateway, calculator_registry());
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.answer, "2");
        assert_eq!(outcome.tool_calls_made, 1);
    }

    #[tokio::test]
    async fn tool_results_keep_request_order() {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SlowEchoTool)).unwrap();
        let calls = vec![
            make_tool_call("slow_echo", serde_json::json!({"text": "A", "delay_ms": 60})),
            make_tool_call("slow_echo", serde_json::json!({"text": "B", "delay_ms": 0})),
            make_tool_call("slow_echo", serde_json::json!({"text": "C", "delay_ms": 30})),
        ];
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(calls),
            Reply::text("<reply>ok</reply>"),
        ]));
        let agent = agent(gateway, tools);
        let mut conversation = Conversation::new();

        agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        let outputs: Vec<&str> = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(outputs, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn tool_failure_is_contained() {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(FailingTool)).unwrap();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(vec![make_tool_call("failing", serde_json::json!({}))]),
            Reply::tools(vec![make_tool_call("no_such_tool", serde_json::json!({}))]),
            Reply::text("<reply>recovered</reply>"),
        ]));
        let agent = agent(gateway, tools);
        let mut conversation = Conversation::new();

        let outcome = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(outcome.answer, "recovered");
        let tool_turns: Vec<&Message> = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_turns.len(), 2);
        assert!(tool_turns.iter().all(|m| m.content.starts_with("Error")));
    }

    #[tokio::test]
    async fn malformed_arguments_reach_the_model_as_errors() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(vec![make_tool_call(
                "calculator",
                serde_json::Value::String("{not json".into()),
            )]),
            Reply::text("<reply>gave up</reply>"),
        ]));
        let agent = agent(gateway, calculator_registry());
        let mut conversation = Conversation::new();

        agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert!(conversation.messages[3].content.starts_with("Error"));
    }

    #[tokio::test]
    async fn reflection_always_appends_after_tools() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(vec![make_tool_call("calculator", serde_json::json!({"expression": "2+2"}))]),
            Reply::text("<reply>4</reply>"),
        ]));
        let agent = agent(gateway, calculator_registry()).with_reflection(ReflectionPolicy::Always);
        let mut conversation = Conversation::new();

        agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert_eq!(conversation.len(), 6);
        assert_eq!(conversation.messages[4].role, Role::Reflection);
        assert_eq!(conversation.messages[4].content, TOOL_REFLECTION_PROMPT);
    }

    #[tokio::test]
    async fn gateway_error_fails_run_and_keeps_turns() {
        let gateway = Arc::new(ScriptedGateway::with_results(vec![
            Ok(Reply::text("hmm")),
            Err(ProviderError::ModelNotFound("mock-model".into())),
        ]));
        let agent = agent(gateway.clone(), ToolRegistry::new());
        let mut conversation = Conversation::new();

        let err = agent.run("q", &mut conversation, &NoopSink, None).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::ModelNotFound(_))));
        assert_eq!(gateway.call_count(), 2);
        // system, user, assistant("hmm"), reflection
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn append_only_across_runs() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::text("<reply>first</reply>"),
            Reply::text("thinking"),
            Reply::text("<reply>second</reply>"),
        ]));
        let agent = agent(gateway, ToolRegistry::new());
        let mut conversation = Conversation::new();

        agent.run("one", &mut conversation, &NoopSink, None).await.unwrap();
        let snapshot: Vec<(String, String)> = conversation
            .messages
            .iter()
            .map(|m| (m.id.clone(), m.content.clone()))
            .collect();

        agent.run("two", &mut conversation, &NoopSink, None).await.unwrap();
        assert!(conversation.len() > snapshot.len());
        for (i, (id, content)) in snapshot.iter().enumerate() {
            assert_eq!(&conversation.messages[i].id, id);
            assert_eq!(&conversation.messages[i].content, content);
        }
        // Only one system turn, the persona stays at the head.
        let systems = conversation.messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_without_calling_model() {
        let gateway = Arc::new(ScriptedGateway::repeating(Reply::text("x")));
        let agent = agent(gateway.clone(), ToolRegistry::new());
        let token = CancellationToken::new();
        token.cancel();
        let mut conversation = Conversation::new();

        let err = agent
            .run("q", &mut conversation, &NoopSink, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_iteration() {
        let token = CancellationToken::new();
        let gateway = Arc::new(
            ScriptedGateway::repeating(Reply::text("x")).cancel_after(2, token.clone()),
        );
        let agent = agent(gateway.clone(), ToolRegistry::new());
        let mut conversation = Conversation::new();

        let err = agent
            .run("q", &mut conversation, &NoopSink, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn emits_progress_events() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply {
                text: "I'll compute it".into(),
                tool_calls: vec![make_tool_call("calculator", serde_json::json!({"expression": "2+2"}))],
            },
            Reply::text("<reply>4</reply>"),
        ]));
        let agent = agent(gateway, calculator_registry());
        let sink = RecordingSink::new();
        let mut conversation = Conversation::new();

        agent.run("q", &mut conversation, &sink, None).await.unwrap();
        assert_eq!(
            sink.names(),
            vec![
                "thinking",
                "thought",
                "tool_call",
                "tool_result",
                "conversation_history",
                "thinking",
                "thought",
                "conversation_history",
            ]
        );

        // History deltas cover every turn exactly once.
        let delivered: usize = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ConversationHistory { messages } => Some(messages.len()),
                _ => None,
            })
            .sum();
        assert_eq!(delivered, conversation.len());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_do_not_reorder_under_paused_time() {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SlowEchoTool)).unwrap();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Reply::tools(vec![
                make_tool_call("slow_echo", serde_json::json!({"text": "first", "delay_ms": 5000})),
                make_tool_call("slow_echo", serde_json::json!({"text": "second", "delay_ms": 1})),
            ]),
            Reply::text("<reply>ok</reply>"),
        ]));
        let agent = agent(gateway, tools);
        let mut conversation = Conversation::new();

        let started = tokio::time::Instant::now();
        agent.run("q", &mut conversation, &NoopSink, None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5001));
        assert_eq!(conversation.messages[3].content, "first");
        assert_eq!(conversation.messages[4].content, "second");
    }
}
