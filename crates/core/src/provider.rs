//! Provider trait: the transport abstraction over LLM backends.
//!
//! A Provider knows how to send an ordered message list (and optionally a tool
//! manifest) to a named model and get a single message back.
//!
//! Implementations: OpenAI-compatible endpoints (Ollama, OpenAI, OpenRouter, vLLM).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolSchema;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "qwen2.5:7b", "gpt-4o")
    pub model: String,

    /// The conversation turns, in order
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call natively
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// One entry of the tool manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// Declared parameters
    pub schema: ToolSchema,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Every LLM backend implements this; the model gateway calls `complete()`
/// without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    ///
    /// Must return [`ProviderError::ModelNotFound`] when the model cannot be
    /// loaded, distinct from transport failures.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check - can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ParamType;

    #[test]
    fn provider_request_defaults() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model": "qwen2.5:7b", "messages": []}"#).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_definition_serializes_schema_as_list() {
        let tool = ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate an arithmetic expression".into(),
            schema: ToolSchema::new().param("expression", ParamType::String, "e.g. 2+2"),
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["schema"][0]["name"], "expression");
        assert_eq!(json["schema"][0]["type"], "string");
    }
}
