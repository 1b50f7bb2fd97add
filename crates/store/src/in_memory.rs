//! In-memory store. Useful for tests and for running without a database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dewey_core::error::StoreError;
use dewey_core::job::{ConversationStore, Job, JobId, JobStatus, JobUpdate};
use dewey_core::message::Conversation;
use tokio::sync::RwLock;

/// Jobs kept in submission order, so the oldest queued job is the first match.
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::Storage(format!("Job {} already exists", job.id)));
        }
        jobs.push(job.clone());
        Ok(())
    }

    async fn read(&self, id: &JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| &j.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(
        &self,
        id: &JobId,
        conversation: &Conversation,
        status: JobStatus,
        outcome: JobUpdate,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.conversation = conversation.clone();
        job.status = status;
        job.answer = outcome.answer;
        job.error = outcome.error;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Queued)
            .map(|job| {
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                job.clone()
            }))
    }

    async fn requeue_processing(&self) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().await;
        let mut moved = 0;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Processing) {
            job.status = JobStatus::Queued;
            job.updated_at = Utc::now();
            moved += 1;
        }
        Ok(moved)
    }

    async fn count(&self, status: JobStatus) -> Result<usize, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.status == status)
            .count())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dewey_core::message::Message;

    #[tokio::test]
    async fn create_then_read() {
        let store = InMemoryStore::new();
        let job = Job::queued("anonymous", "hi");
        store.create(&job).await.unwrap();

        let read = store.read(&job.id).await.unwrap();
        assert_eq!(read.message, "hi");
        assert_eq!(read.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = InMemoryStore::new();
        let job = Job::queued("anonymous", "hi");
        store.create(&job).await.unwrap();
        assert!(store.create(&job).await.is_err());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.read(&JobId::from("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store
            .update(
                &JobId::from("nope"),
                &Conversation::new(),
                JobStatus::Done,
                JobUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn claims_oldest_queued_first() {
        let store = InMemoryStore::new();
        let first = Job::queued("a", "one");
        let second = Job::queued("a", "two");
        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_overwrites_conversation_and_outcome() {
        let store = InMemoryStore::new();
        let job = Job::queued("a", "q");
        store.create(&job).await.unwrap();

        let mut conv = Conversation::new();
        conv.push(Message::user("q"));
        conv.push(Message::assistant("a"));
        store
            .update(
                &job.id,
                &conv,
                JobStatus::Done,
                JobUpdate {
                    answer: Some("a".into()),
                    error: None,
                },
            )
            .await
            .unwrap();

        let read = store.read(&job.id).await.unwrap();
        assert_eq!(read.status, JobStatus::Done);
        assert_eq!(read.conversation.len(), 2);
        assert_eq!(read.answer.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn requeue_moves_processing_back() {
        let store = InMemoryStore::new();
        store.create(&Job::queued("a", "one")).await.unwrap();
        store.create(&Job::queued("a", "two")).await.unwrap();
        store.claim_next().await.unwrap();

        assert_eq!(store.count(JobStatus::Processing).await.unwrap(), 1);
        assert_eq!(store.requeue_processing().await.unwrap(), 1);
        assert_eq!(store.count(JobStatus::Queued).await.unwrap(), 2);
        assert_eq!(store.count(JobStatus::Processing).await.unwrap(), 0);
    }
}
