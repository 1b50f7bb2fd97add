//! Interactive chat: one loop run per request, with the final answer or
//! failure pushed to the client as an event.

use std::sync::Arc;
use std::time::Instant;

use dewey_core::error::Error;
use dewey_core::event::{AgentEvent, EventSink};
use dewey_core::message::Conversation;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::loop_runner::{AgentLoop, AgentOutcome};

/// Wraps an [`AgentLoop`] for a live client connection.
#[derive(Clone)]
pub struct ChatSession {
    agent: Arc<AgentLoop>,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop future iterations when `token` is cancelled (e.g. the client left).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Answer one message, ending with `chat_response` or `error`.
    ///
    /// Turns appended before a failure stay in `conversation`.
    pub async fn respond(
        &self,
        message: &str,
        conversation: &mut Conversation,
        events: &dyn EventSink,
    ) -> Result<AgentOutcome, Error> {
        let started = Instant::now();
        let result = self
            .agent
            .run(message, conversation, events, Some(&self.cancel))
            .await;
        let thinking_time = round_secs(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => events.emit(AgentEvent::ChatResponse {
                response: outcome.answer.clone(),
                thinking_time,
            }),
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Chat request failed");
                events.emit(AgentEvent::Error {
                    message: e.to_string(),
                    thinking_time,
                });
            }
        }
        result
    }
}

/// Seconds, rounded to two decimals.
fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
