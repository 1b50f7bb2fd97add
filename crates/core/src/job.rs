//! Jobs and the conversation store contract used by queued execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::Conversation;

/// Opaque unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    /// Finished, answered or not. Spelled `completed` on the wire.
    #[serde(rename = "completed")]
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable, asynchronously processed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Who submitted the query (API key or "anonymous")
    pub submitter: String,

    pub status: JobStatus,

    /// The user's query
    pub message: String,

    pub conversation: Conversation,

    /// Final (or exhausted) answer, once done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Failure message when the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh queued job with an empty conversation.
    pub fn queued(submitter: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            submitter: submitter.into(),
            status: JobStatus::Queued,
            message: message.into(),
            conversation: Conversation::new(),
            answer: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The outcome written back when a job finishes.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub answer: Option<String>,
    pub error: Option<String>,
}

/// Durable keyed storage for job conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a new job.
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a job. `StoreError::NotFound` if the id is unknown.
    async fn read(&self, id: &JobId) -> Result<Job, StoreError>;

    /// Overwrite a job's conversation and status.
    async fn update(
        &self,
        id: &JobId,
        conversation: &Conversation,
        status: JobStatus,
        outcome: JobUpdate,
    ) -> Result<(), StoreError>;

    /// Atomically move the oldest queued job to processing and return it.
    async fn claim_next(&self) -> Result<Option<Job>, StoreError>;

    /// Put every processing job back in the queue. Returns how many moved.
    async fn requeue_processing(&self) -> Result<usize, StoreError>;

    /// Number of jobs in the given status.
    async fn count(&self, status: JobStatus) -> Result<usize, StoreError>;

    /// Store backend name (for diagnostics).
    fn name(&self) -> &str;
}
