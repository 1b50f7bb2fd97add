//! Conversation store backends for queued jobs.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use dewey_config::StoreConfig;
use dewey_core::error::StoreError;
use dewey_core::job::ConversationStore;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Open the backend named in the configuration.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
                })?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
        other => Err(StoreError::Storage(format!("Unknown store backend '{other}'"))),
    }
}
