//! Tool trait and registry.
//!
//! Tools give the agent the ability to act: evaluate arithmetic, search the
//! web, read pages, run a line of Python. The [`ToolRegistry`] is built once
//! at process start and shared by every agent run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool, as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Argument bundle. Expected to be a JSON object; anything else is
    /// reported back to the model at dispatch time.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The textual output fed back to the model
    pub output: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: format!("Error: {reason}"),
        }
    }
}

/// JSON type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Declared parameter schema of a tool, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSchema {
    pub parameters: Vec<ToolParameter>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    pub fn param(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.parameters.push(ToolParameter {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.parameters.push(ToolParameter {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    /// Render as a JSON Schema object for native tool-calling APIs.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                serde_json::json!({ "type": p.kind.as_str(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check an argument bundle against the declared parameters.
    ///
    /// Unknown keys are tolerated; models often add extras.
    pub fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        let Some(map) = arguments.as_object() else {
            return Err(ToolError::InvalidArguments(format!(
                "expected a JSON object of arguments, got {arguments}"
            )));
        };
        for p in &self.parameters {
            match map.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required parameter '{}'",
                        p.name
                    )));
                }
                Some(v) if !v.is_null() && !p.kind.matches(v) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "parameter '{}' must be of type {}",
                        p.name,
                        p.kind.as_str()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The core Tool trait.
///
/// Each built-in tool implements this trait and is registered in the
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters.
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for the model-facing manifest.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
        }
    }
}

/// A registry of available tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Names are unique across the registry.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        debug!(tool = %name, "Registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Result<&dyn Tool, ToolError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].as_ref())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Tool definitions in registration order.
    pub fn manifest(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Plain-text tool listing for prompt-based protocols.
    pub fn manifest_prompt(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                let args: Vec<String> = t
                    .schema()
                    .parameters
                    .iter()
                    .map(|p| format!("{}:{}", p.name, p.kind.as_str()))
                    .collect();
                format!("{}: {} (arguments: {})", t.name(), t.description(), args.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a tool by name and return its textual result.
    ///
    /// Never fails: every error becomes a string starting with `"Error"`.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> String {
        self.dispatch_result(name, arguments).await.output
    }

    /// Like [`dispatch`](Self::dispatch), keeping the success flag.
    pub async fn dispatch_result(&self, name: &str, arguments: Value) -> ToolResult {
        let tool = match self.lookup(name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %name, "Model requested unknown tool");
                return ToolResult::error(e);
            }
        };

        if let Err(e) = tool.schema().validate(&arguments) {
            warn!(tool = %name, error = %e, "Rejected tool arguments");
            return ToolResult::error(e);
        }

        match AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::error(e)
            }
            Err(_) => {
                warn!(tool = %name, "Tool panicked");
                ToolResult::error(format!("tool '{name}' crashed"))
            }
        }
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
