//! OpenAI-compatible provider implementation.
//!
//! Works with: Ollama, OpenAI, OpenRouter, vLLM, llama.cpp and any endpoint
//! exposing `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions with native tool calling
//! - Model listing and health checks

use async_trait::async_trait;
use dewey_core::error::ProviderError;
use dewey_core::message::{Message, Role};
use dewey_core::provider::*;
use dewey_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert turns to OpenAI API format.
    ///
    /// Reflection turns are sent as user messages.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User | Role::Reflection => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: Value::String(encode_arguments(&tc.arguments)),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.schema.to_json_schema(),
                },
            })
            .collect()
    }
}

/// Arguments go over the wire as a JSON string.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Arguments come back as a JSON string (OpenAI) or an object (some local
/// servers). Unparseable strings are kept verbatim for dispatch to report.
fn decode_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) if raw.trim().is_empty() => Value::Object(serde_json::Map::new()),
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

/// Map a non-success HTTP status to a provider error.
fn classify_error(status: u16, body: String, model: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ if lowered.contains("model") && lowered.contains("not found") => {
            ProviderError::ModelNotFound(model.to_string())
        }
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

impl OpenAiCompatProvider {
    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }

    async fn fetch_models(&self) -> Result<reqwest::Response, ProviderError> {
        self.authorized(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl dewey_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = ChatRequest {
            model: &request.model,
            messages: Self::to_api_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: (!request.tools.is_empty()).then(|| Self::to_api_tools(&request.tools)),
            stream: false,
        };

        debug!(
            provider = %self.name,
            model = %request.model,
            turns = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "POST chat/completions"
        );

        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = status.as_u16(), body = %text, "Completion rejected");
            return Err(classify_error(status.as_u16(), text, &request.model));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: status.as_u16(),
            message: format!("Unreadable completion body: {e}"),
        })?;
        parsed.into_response(request.model)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.fetch_models().await?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(parse_model_list(&body))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(self.fetch_models().await?.status().is_success())
    }
}

fn parse_model_list(body: &Value) -> Vec<String> {
    let Some(entries) = body["data"].as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| entry["id"].as_str())
        .map(str::to_string)
        .collect()
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolDefinition>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    /// Take the first choice as the assistant turn.
    fn into_response(self, requested_model: String) -> Result<ProviderResponse, ProviderError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: "Completion had no choices".into(),
            });
        };
        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall::new(call.id, call.function.name, decode_arguments(call.function.arguments)))
            .collect();

        Ok(ProviderResponse {
            message: Message::assistant_with_tools(choice.message.content.unwrap_or_default(), calls),
            usage: self.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: self.model.unwrap_or(requested_model),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dewey_core::tool::{ParamType, ToolSchema};
    use dewey_core::Provider;

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("vllm", "http://localhost:8000/v1/", "");
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion_maps_reflection_to_user() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::reflection("Are you done?"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        let roles: Vec<&str> = api_messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "user"]);
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "calculator", serde_json::json!({"expression": "2+2"}))],
        );
        let api = OpenAiCompatProvider::to_api_messages(&[msg, Message::tool_result("call_1", "4")]);
        let tc = &api[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.name, "calculator");
        assert_eq!(tc.function.arguments, Value::String(r#"{"expression":"2+2"}"#.into()));
        assert_eq!(api[1].role, "tool");
        assert_eq!(api[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate arithmetic".into(),
            schema: ToolSchema::new().param("expression", ParamType::String, "e.g. 2+2"),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "calculator");
        assert_eq!(api_tools[0].r#type, "function");
        assert_eq!(api_tools[0].function.parameters["required"][0], "expression");
    }

    #[test]
    fn parse_response_with_string_arguments() {
        let data = r#"{"model":"qwen2.5:7b","choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_9","type":"function","function":{"name":"calculator","arguments":"{\"expression\":\"2+2\"}"}}]}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let response = parsed.into_response("requested".into()).unwrap();
        assert_eq!(response.model, "qwen2.5:7b");
        assert!(response.message.content.is_empty());
        let call = &response.message.tool_calls[0];
        assert_eq!(call.id, "call_9");
        assert_eq!(call.arguments["expression"], "2+2");
    }

    #[test]
    fn empty_choices_is_an_api_error() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            parsed.into_response("m".into()),
            Err(ProviderError::ApiError { .. })
        ));
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let body = ChatRequest {
            model: "qwen2.5:7b",
            messages: OpenAiCompatProvider::to_api_messages(&[Message::user("hi")]),
            temperature: 0.7,
            max_tokens: None,
            tools: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "qwen2.5:7b");
        assert_eq!(json["stream"], false);
        assert!(json.get("tools").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn decode_arguments_handles_objects_and_garbage() {
        assert_eq!(decode_arguments(serde_json::json!({"a": 1}))["a"], 1);
        assert_eq!(decode_arguments(Value::String(String::new())), serde_json::json!({}));
        assert_eq!(decode_arguments(Value::String("{oops".into())), Value::String("{oops".into()));
    }

    #[test]
    fn missing_model_is_distinct_from_transport_errors() {
        assert!(matches!(
            classify_error(404, "{}".into(), "llava:7b"),
            ProviderError::ModelNotFound(m) if m == "llava:7b"
        ));
        assert!(matches!(
            classify_error(500, r#"{"error":"model 'x' not found, try pulling it first"}"#.into(), "x"),
            ProviderError::ModelNotFound(_)
        ));
        assert!(matches!(
            classify_error(500, "internal".into(), "x"),
            ProviderError::ApiError { status_code: 500, .. }
        ));
        assert!(matches!(classify_error(429, String::new(), "x"), ProviderError::RateLimited { .. }));
        assert!(matches!(classify_error(401, String::new(), "x"), ProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn parses_model_listing() {
        let body = serde_json::json!({"data": [{"id": "qwen2.5:7b"}, {"id": "llama3.2:3b"}]});
        assert_eq!(parse_model_list(&body), vec!["qwen2.5:7b", "llama3.2:3b"]);
        assert!(parse_model_list(&serde_json::json!({})).is_empty());
    }
}
