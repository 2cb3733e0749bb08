//! Response store trait definitions

use super::record::{ExportBundle, ImportSummary, Record, StoreStats};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid import data: {0}")]
    InvalidImport(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for saved responses.
///
/// `list` is newest-first. Saving a record whose id already exists
/// replaces it.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn save(&self, record: Record) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<Record>>;

    async fn clear(&self) -> StoreResult<()>;

    /// Remove one record. Returns whether it existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats::from_records(&self.list().await?))
    }

    async fn export(&self) -> StoreResult<ExportBundle> {
        Ok(ExportBundle::new(self.list().await?))
    }

    /// Merge a bundle, skipping records whose timestamp is already present.
    async fn import(&self, bundle: ExportBundle) -> StoreResult<ImportSummary> {
        let mut seen: HashSet<_> = self.list().await?.iter().map(|r| r.timestamp).collect();
        let mut imported = 0;
        for record in bundle.responses {
            if seen.insert(record.timestamp) {
                self.save(record).await?;
                imported += 1;
            }
        }
        let total = self.list().await?.len();
        tracing::info!(imported, total, "import complete");
        Ok(ImportSummary { imported, total })
    }
}

/// Stores backed by a location on disk.
pub trait OpenStore: ResponseStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StoreResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StoreResult<Self>;
}
