//! Model gateway: one call to a named model, normalized into a [`Reply`].

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::message::Conversation;
use crate::provider::ToolDefinition;
use crate::reply::Reply;

/// Sends a conversation to a named model and returns a single normalized reply.
///
/// Implementations must not mutate the conversation and must not retry;
/// failures are reported upward. A missing model surfaces as
/// [`ProviderError::ModelNotFound`].
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        conversation: &Conversation,
        tools: Option<&[ToolDefinition]>,
    ) -> std::result::Result<Reply, ProviderError>;
}
