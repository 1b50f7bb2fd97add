//! Error types for the Dewey domain.
//!
//! Each bounded context has its own `thiserror` enum; [`Error`] wraps them
//! for callers that cross context boundaries.

use thiserror::Error;

/// The top-level error type for Dewey operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model gateway errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool registry errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller asked the loop to stop before the next iteration.
    #[error("Agent run cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shorthand for results that can fail with any Dewey error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Backend returned HTTP {status_code}: {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Backend is rate limiting, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Backend rejected credentials: {0}")]
    AuthenticationFailed(String),

    /// The named model cannot be loaded or pulled by the backend.
    #[error("Model not available: {0}")]
    ModelNotFound(String),

    #[error("No provider named '{0}' is configured")]
    NotConfigured(String),

    #[error("Model call timed out: {0}")]
    Timeout(String),

    #[error("Cannot reach backend: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this is the "model not available" case rather than a transport failure.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::ModelNotFound(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("No tool named '{0}'")]
    NotFound(String),

    #[error("A tool named '{0}' is already registered")]
    DuplicateName(String),

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{tool_name} did not finish within {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Bad arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No job with id {0}")]
    NotFound(String),

    #[error("Job store failure: {0}")]
    Storage(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),
}
