//! The concrete model gateway: a transport plus a reply parser.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dewey_core::error::ProviderError;
use dewey_core::message::{Conversation, Message, Role};
use dewey_core::model_gateway::ModelGateway;
use dewey_core::provider::{Provider, ProviderRequest, ToolDefinition};
use dewey_core::reply::{Reply, ReplyParser};
use tracing::debug;

/// Sends conversations through a [`Provider`] and normalizes replies with a
/// [`ReplyParser`].
pub struct ProviderGateway {
    provider: Arc<dyn Provider>,
    parser: Arc<dyn ReplyParser>,
    temperature: f32,
    max_tokens: Option<u32>,
    /// Plain-text manifest used by prompt-based protocols.
    tool_listing: String,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn Provider>, parser: Arc<dyn ReplyParser>) -> Self {
        Self {
            provider,
            parser,
            temperature: 0.7,
            max_tokens: None,
            tool_listing: String::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Tool listing injected into the system turn for text protocols.
    pub fn with_tool_listing(mut self, listing: impl Into<String>) -> Self {
        self.tool_listing = listing.into();
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Copy the conversation's turns, adding protocol instructions to the
    /// system turn when the parser needs them.
    fn request_messages(&self, conversation: &Conversation, tools_enabled: bool) -> Vec<Message> {
        let mut messages = conversation.messages.clone();
        if !self.parser.uses_native_tools() {
            flatten_tool_turns(&mut messages);
        }
        if !tools_enabled {
            return messages;
        }
        let Some(instructions) = self.parser.instructions(&self.tool_listing) else {
            return messages;
        };
        match messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = format!("{}\n\n{instructions}", first.content);
            }
            _ => messages.insert(0, Message::system(instructions)),
        }
        messages
    }
}

/// Rewrite tool traffic as plain text for prompt-based protocols: assistant
/// turns lose their structured calls and tool results become user turns.
fn flatten_tool_turns(messages: &mut [Message]) {
    let mut names: HashMap<String, String> = HashMap::new();
    for message in messages.iter_mut() {
        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                for call in message.tool_calls.drain(..) {
                    names.insert(call.id, call.name);
                }
            }
            Role::Tool => {
                let name = message
                    .tool_call_id
                    .take()
                    .and_then(|id| names.get(&id).cloned());
                let content = match name {
                    Some(name) => format!("Tool result ({name}): {}", message.content),
                    None => format!("Tool result: {}", message.content),
                };
                *message = Message::user(content);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ModelGateway for ProviderGateway {
    async fn complete(
        &self,
        model: &str,
        conversation: &Conversation,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Reply, ProviderError> {
        let tools_enabled = tools.is_some_and(|t| !t.is_empty());
        let native_tools = match tools {
            Some(defs) if self.parser.uses_native_tools() => defs.to_vec(),
            _ => Vec::new(),
        };

        let request = ProviderRequest {
            model: model.to_string(),
            messages: self.request_messages(conversation, tools_enabled),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: native_tools,
        };

        debug!(
            provider = %self.provider.name(),
            model,
            protocol = ?self.parser.protocol(),
            turns = request.messages.len(),
            "Calling model"
        );

        let response = self.provider.complete(request).await?;
        Ok(self.parser.parse(response.message))
    }
}
