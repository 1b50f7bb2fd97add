//! # Dewey Core
//!
//! Domain types, traits, and error definitions for the Dewey agentic chat
//! orchestrator. This crate defines the model every other crate implements
//! against and carries no framework dependencies.
//!
//! ## Layout
//!
//! - Turns and conversations: [`message`]
//! - Tools and the registry: [`tool`]
//! - Model transport and gateway: [`provider`], [`model_gateway`], [`reply`]
//! - Queued execution: [`job`]
//! - Observability: [`event`]

pub mod error;
pub mod event;
pub mod job;
pub mod message;
pub mod model_gateway;
pub mod persona;
pub mod provider;
pub mod reply;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{AgentEvent, ChannelSink, EventSink, NoopSink};
pub use job::{ConversationStore, Job, JobId, JobStatus, JobUpdate};
pub use message::{Conversation, ConversationId, Message, Role};
pub use model_gateway::ModelGateway;
pub use persona::{Persona, ReflectionPolicy};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use reply::{AnswerDelimiter, DelimitedTextParser, NativeToolCallParser, Reply, ReplyParser, ReplyProtocol};
pub use tool::{ParamType, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
