//! Queued execution: submit a query, let a single background worker answer
//! it, and poll for the result.

use std::sync::Arc;
use std::time::Duration;

use dewey_core::error::{Error, StoreError};
use dewey_core::event::NoopSink;
use dewey_core::job::{ConversationStore, Job, JobId, JobStatus, JobUpdate};
use dewey_core::message::Conversation;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::loop_runner::AgentLoop;

/// What a client sees when polling a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,

    /// Only populated once the job is completed
    #[serde(rename = "conversation_history", skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        match job.status {
            JobStatus::Done => Self {
                status: job.status,
                conversation: Some(job.conversation),
                answer: job.answer,
                error: job.error,
            },
            status => Self {
                status,
                conversation: None,
                answer: None,
                error: None,
            },
        }
    }
}

/// Submission and status front of the job store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn ConversationStore>,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue a message and wake the worker.
    pub async fn submit(&self, submitter: &str, message: &str) -> Result<JobId, StoreError> {
        let job = Job::queued(submitter, message);
        self.store.create(&job).await?;
        info!(job_id = %job.id, submitter, "Job queued");
        self.notify.notify_one();
        Ok(job.id)
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatusView, StoreError> {
        self.store.read(id).await.map(JobStatusView::from)
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }
}

/// Processes queued jobs strictly one at a time.
pub struct JobWorker {
    queue: JobQueue,
    agent: Arc<AgentLoop>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: JobQueue, agent: Arc<AgentLoop>) -> Self {
        Self {
            queue,
            agent,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until `cancel` fires.
    ///
    /// Jobs left in `processing` by a previous crash are requeued first.
    /// When the queue is empty the worker sleeps until a submission wakes
    /// it or the poll interval passes.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        let requeued = self.queue.store.requeue_processing().await?;
        if requeued > 0 {
            warn!(requeued, "Requeued jobs left in processing");
        }
        info!(store = self.queue.store.name(), "Job worker started");

        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(error = %e, "Job worker store failure"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notify.notified() => debug!("Job worker woken"),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Job worker stopped");
        Ok(())
    }

    /// Claim and process at most one job. Returns its id, if any.
    pub async fn run_once(&self) -> Result<Option<JobId>, Error> {
        let store = &self.queue.store;
        let Some(job) = store.claim_next().await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, "Processing job");

        let mut conversation = job.conversation;
        let update = match self
            .agent
            .run(&job.message, &mut conversation, &NoopSink, None)
            .await
        {
            Ok(outcome) => {
                info!(job_id = %job.id, state = ?outcome.state, iterations = outcome.iterations, "Job completed");
                JobUpdate {
                    answer: Some(outcome.answer),
                    error: None,
                }
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job failed");
                JobUpdate {
                    answer: None,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = store
            .update(&job.id, &conversation, JobStatus::Done, update.clone())
            .await
        {
            warn!(job_id = %job.id, error = %e, "Saving job result failed, retrying once");
            if let Err(e) = store
                .update(&job.id, &conversation, JobStatus::Done, update.clone())
                .await
            {
                error!(
                    job_id = %job.id,
                    answer = update.answer.as_deref().unwrap_or_default(),
                    failure = update.error.as_deref().unwrap_or_default(),
                    error = %e,
                    "Job result lost"
                );
                return Err(e.into());
            }
        }
        Ok(Some(job.id))
    }
}
