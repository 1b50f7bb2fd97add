//! Reply normalization.
//!
//! Models ask for tools in one of two ways: through the provider's native
//! tool-calling field, or by writing a tagged block into plain text. A
//! [`ReplyParser`] turns either shape into a single [`Reply`] so the agent
//! loop never has to know which protocol is in play.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::tool::ToolCall;

/// The normalized output of one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Which tool-calling protocol a parser speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyProtocol {
    /// Provider-native `tool_calls` field.
    #[default]
    Native,
    /// `<tool_call>{json}</tool_call>` blocks in plain text.
    Delimited,
}

/// Strategy for turning a raw provider message into a [`Reply`].
pub trait ReplyParser: Send + Sync {
    fn protocol(&self) -> ReplyProtocol;

    /// Whether the tool manifest should be sent through the provider's
    /// native tools field.
    fn uses_native_tools(&self) -> bool {
        self.protocol() == ReplyProtocol::Native
    }

    /// Extra system-prompt text describing how to request tools, if the
    /// protocol needs it. `tool_listing` is the registry's plain-text manifest.
    fn instructions(&self, _tool_listing: &str) -> Option<String> {
        None
    }

    /// Normalize one provider message. Never fails: unparseable structure is
    /// left in `text` and treated as a thought by the loop.
    fn parse(&self, message: Message) -> Reply;
}

/// Reads tool calls from the provider's native field.
#[derive(Debug, Clone, Default)]
pub struct NativeToolCallParser;

impl ReplyParser for NativeToolCallParser {
    fn protocol(&self) -> ReplyProtocol {
        ReplyProtocol::Native
    }

    fn parse(&self, message: Message) -> Reply {
        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = new_call_id();
                }
                call
            })
            .collect();
        Reply {
            text: message.content,
            tool_calls,
        }
    }
}

/// Extracts tool calls written as tagged JSON blocks in the reply text.
///
/// ```text
/// <tool_call>{"name": "calculator", "arguments": {"expression": "2+2"}}</tool_call>
/// ```
#[derive(Debug, Clone)]
pub struct DelimitedTextParser {
    tag: String,
    pattern: Regex,
}

impl DelimitedTextParser {
    pub const DEFAULT_TAG: &'static str = "tool_call";

    pub fn new(tag: &str) -> Result<Self, regex_lite::Error> {
        let escaped = regex_lite::escape(tag);
        let pattern = Regex::new(&format!(r"(?is)<{escaped}>(.*?)</{escaped}>"))?;
        Ok(Self {
            tag: tag.to_string(),
            pattern,
        })
    }

    fn parse_block(block: &str) -> Option<ToolCall> {
        let value: Value = serde_json::from_str(block.trim()).ok()?;
        let name = value.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        let arguments = value
            .get("arguments")
            .or_else(|| value.get("parameters"))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Some(ToolCall::new(new_call_id(), name, arguments))
    }
}

impl ReplyParser for DelimitedTextParser {
    fn protocol(&self) -> ReplyProtocol {
        ReplyProtocol::Delimited
    }

    fn instructions(&self, tool_listing: &str) -> Option<String> {
        let tag = &self.tag;
        Some(format!(
            "You can use the following tools:\n{tool_listing}\n\n\
             To use a tool, write exactly one block per call:\n\
             <{tag}>{{\"name\": \"tool_name\", \"arguments\": {{\"param\": \"value\"}}}}</{tag}>\n\
             Wait for the tool result before continuing."
        ))
    }

    fn parse(&self, message: Message) -> Reply {
        let mut tool_calls = Vec::new();
        for caps in self.pattern.captures_iter(&message.content) {
            let Some(block) = caps.get(1) else { continue };
            match Self::parse_block(block.as_str()) {
                Some(call) => tool_calls.push(call),
                None => debug!(block = block.as_str(), "Ignoring malformed tool call block"),
            }
        }
        Reply {
            text: message.content,
            tool_calls,
        }
    }
}

/// Build the parser for a protocol.
pub fn parser_for(protocol: ReplyProtocol) -> Result<Box<dyn ReplyParser>, regex_lite::Error> {
    Ok(match protocol {
        ReplyProtocol::Native => Box::new(NativeToolCallParser),
        ReplyProtocol::Delimited => Box::new(DelimitedTextParser::new(DelimitedTextParser::DEFAULT_TAG)?),
    })
}

/// Finds the final answer between an open/close tag pair, case-insensitively.
#[derive(Debug, Clone)]
pub struct AnswerDelimiter {
    tag: String,
    pattern: Regex,
}

impl AnswerDelimiter {
    pub const DEFAULT_TAG: &'static str = "reply";

    pub fn new(tag: &str) -> Result<Self, regex_lite::Error> {
        let escaped = regex_lite::escape(tag);
        let pattern = Regex::new(&format!(r"(?is)<{escaped}>(.*?)</{escaped}>"))?;
        Ok(Self {
            tag: tag.to_string(),
            pattern,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Trimmed content of the first delimited block, if present.
    pub fn extract(&self, text: &str) -> Option<String> {
        self.pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_parser_passes_tool_calls_through() {
        let msg = Message::assistant_with_tools(
            "let me compute",
            vec![ToolCall::new("call_a", "calculator", json!({"expression": "2+2"}))],
        );
        let reply = NativeToolCallParser.parse(msg);
        assert_eq!(reply.text, "let me compute");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_a");
    }

    #[test]
    fn native_parser_fills_missing_ids() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("", "calculator", json!({"expression": "1"}))],
        );
        let reply = NativeToolCallParser.parse(msg);
        assert!(reply.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn delimited_parser_extracts_blocks_in_order() {
        let parser = DelimitedTextParser::new("tool_call").unwrap();
        let text = r#"First <TOOL_CALL>{"name": "search_web", "arguments": {"query": "rust"}}</TOOL_CALL>
then <tool_call>{"name": "calculator", "arguments": {"expression": "3*3"}}</tool_call>"#;
        let reply = parser.parse(Message::assistant(text));
        let names: Vec<&str> = reply.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["search_web", "calculator"]);
        assert_eq!(reply.tool_calls[1].arguments["expression"], "3*3");
        assert_eq!(reply.text, text);
    }

    #[test]
    fn delimited_parser_ignores_malformed_blocks() {
        let parser = DelimitedTextParser::new("tool_call").unwrap();
        let reply = parser.parse(Message::assistant(
            "<tool_call>{not json}</tool_call> <tool_call>{\"arguments\": {}}</tool_call>",
        ));
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn delimited_parser_describes_protocol() {
        let parser = DelimitedTextParser::new("tool_call").unwrap();
        let text = parser.instructions("calculator: math").unwrap();
        assert!(text.contains("calculator: math"));
        assert!(text.contains("<tool_call>"));
        assert!(!parser.uses_native_tools());
        assert!(NativeToolCallParser.uses_native_tools());
    }

    #[test]
    fn answer_extraction_trims_and_ignores_case() {
        let delim = AnswerDelimiter::new("reply").unwrap();
        assert_eq!(delim.extract("blah <reply>42</reply> blah").as_deref(), Some("42"));
        assert_eq!(delim.extract("<REPLY>\n  4 \n</Reply>").as_deref(), Some("4"));
        assert_eq!(delim.extract("no tags here"), None);
        assert_eq!(delim.extract("<reply>unterminated"), None);
    }

    #[test]
    fn answer_extraction_takes_first_block() {
        let delim = AnswerDelimiter::new("answer").unwrap();
        assert_eq!(
            delim.extract("<answer>a</answer><answer>b</answer>").as_deref(),
            Some("a")
        );
    }

    #[test]
    fn protocol_deserializes_snake_case() {
        let p: ReplyProtocol = serde_json::from_str("\"delimited\"").unwrap();
        assert_eq!(p, ReplyProtocol::Delimited);
        assert!(parser_for(ReplyProtocol::Native).unwrap().uses_native_tools());
    }
}
