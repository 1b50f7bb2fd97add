//! SQLite job store.
//!
//! One `jobs` table holds every job with its conversation serialized as
//! JSON. Claiming is a single `UPDATE ... RETURNING` statement so two
//! workers can never take the same job.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dewey_core::error::StoreError;
use dewey_core::job::{ConversationStore, Job, JobId, JobStatus, JobUpdate};
use dewey_core::message::Conversation;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

const JOB_COLUMNS: &str =
    "id, submitter, status, message, conversation, answer, error, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// `":memory:"` gives an ephemeral database, handy in tests.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is its own database.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite job store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id           TEXT PRIMARY KEY NOT NULL,
                submitter    TEXT NOT NULL,
                status       TEXT NOT NULL,
                message      TEXT NOT NULL,
                conversation TEXT NOT NULL,
                answer       TEXT,
                error        TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("jobs table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("status index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::Storage(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let status: String = row.try_get("status").map_err(|e| column("status", e))?;
        let conversation: String = row
            .try_get("conversation")
            .map_err(|e| column("conversation", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

        Ok(Job {
            id: JobId(id),
            submitter: row.try_get("submitter").map_err(|e| column("submitter", e))?,
            status: JobStatus::parse(&status)
                .ok_or_else(|| StoreError::Storage(format!("Unknown job status '{status}'")))?,
            message: row.try_get("message").map_err(|e| column("message", e))?,
            conversation: serde_json::from_str(&conversation)
                .map_err(|e| StoreError::Storage(format!("Corrupt conversation: {e}")))?,
            answer: row.try_get("answer").map_err(|e| column("answer", e))?,
            error: row.try_get("error").map_err(|e| column("error", e))?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so timestamps order lexically.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json(conversation: &Conversation) -> Result<String, StoreError> {
    serde_json::to_string(conversation)
        .map_err(|e| StoreError::Storage(format!("Conversation serialization: {e}")))
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))
        .bind(job.id.as_str())
        .bind(&job.submitter)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(to_json(&job.conversation)?)
        .bind(&job.answer)
        .bind(&job.error)
        .bind(timestamp(job.created_at))
        .bind(timestamp(job.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert failed: {e}")))?;

        debug!(job_id = %job.id, "Job created");
        Ok(())
    }

    async fn read(&self, id: &JobId) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Read failed: {e}")))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Self::row_to_job(&row)
    }

    async fn update(
        &self,
        id: &JobId,
        conversation: &Conversation,
        status: JobStatus,
        outcome: JobUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET conversation = ?2, status = ?3, answer = ?4, error = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(to_json(conversation)?)
        .bind(status.as_str())
        .bind(outcome.answer)
        .bind(outcome.error)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET status = 'processing', updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs WHERE status = 'queued'
                ORDER BY created_at, rowid LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Claim failed: {e}")))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn requeue_processing(&self) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', updated_at = ?1 WHERE status = 'processing'",
        )
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Requeue failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, status: JobStatus) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Count failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Storage(format!("count column: {e}")))?;
        Ok(n as usize)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
