//! Persona and reflection prompts.
//!
//! The persona is the system prompt placed at the head of every conversation.
//! Reflection prompts are the synthetic nudges the agent loop appends.

use serde::{Deserialize, Serialize};

/// Appended after tool results when [`ReflectionPolicy::Always`] is active.
pub const TOOL_REFLECTION_PROMPT: &str = "Review the tool results above. \
    If they are sufficient, give your final answer; otherwise call another tool.";

/// Appended when the model replied with neither a tool call nor a final answer.
pub fn thought_nudge(answer_tag: &str) -> String {
    format!(
        "Continue. Either call a tool, or give your final answer wrapped in \
         <{answer_tag}></{answer_tag}> tags."
    )
}

/// Whether the loop asks the model to evaluate tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionPolicy {
    /// Append a reflection turn after every batch of tool results.
    Always,
    /// Go straight back to the model with the tool results.
    #[default]
    Never,
}

/// The assistant's persona and standing instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
}

impl Persona {
    /// Default persona that tells the model how to mark its final answer.
    pub fn default_for_tag(answer_tag: &str) -> Self {
        Self {
            name: "Dewey".into(),
            system_prompt: format!(
                "You are a helpful assistant. \
                 Use the available tools whenever they help answer the user's question, \
                 and check whether each tool result is enough before answering. \
                 When you are ready to give your final answer, wrap it in \
                 <{answer_tag}></{answer_tag}> tags."
            ),
        }
    }

    /// A persona with a caller-supplied system prompt.
    pub fn custom(system_prompt: impl Into<String>) -> Self {
        Self {
            name: "custom".into(),
            system_prompt: system_prompt.into(),
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::default_for_tag("reply")
    }
}
