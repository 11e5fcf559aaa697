use crate::buffer::SledQueue;
use crate::domain::{Batch, Statement};
use crate::outcome::OutcomeLog;
use std::path::PathBuf;
use thiserror::Error;

const STATEMENT_QUEUE_TREE: &str = "statement_queue";
const BATCH_QUEUE_TREE: &str = "batch_queue";
const STATEMENT_LOG_TREE: &str = "statement_log";
const REQUEST_LOG_TREE: &str = "request_log";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Payload codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Corrupt record {id} in {tree}")]
    CorruptRecord { tree: String, id: u64 },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/lrs-forwarder"),
            flush_every_ms: Some(500),
        }
    }
}

/// Durable backing for both queues and the outcome log.
///
/// Cloning is cheap; every clone shares the same database.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .path(&config.path)
            .flush_every_ms(config.flush_every_ms)
            .open()?;

        tracing::debug!(path = %config.path.display(), "Opened store");
        Ok(Self { db })
    }

    /// Throwaway database removed on drop. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn statement_queue(&self) -> Result<SledQueue<Statement>, StoreError> {
        SledQueue::open(&self.db, STATEMENT_QUEUE_TREE)
    }

    pub fn batch_queue(&self) -> Result<SledQueue<Batch>, StoreError> {
        SledQueue::open(&self.db, BATCH_QUEUE_TREE)
    }

    pub fn outcome_log(&self) -> Result<OutcomeLog, StoreError> {
        OutcomeLog::open(&self.db, STATEMENT_LOG_TREE, REQUEST_LOG_TREE)
    }

    pub async fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush_async().await?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("trees", &self.db.tree_names().len())
            .finish()
    }
}
