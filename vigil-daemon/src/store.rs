//! Job store selection.
//!
//! The backend is chosen at runtime from `[store] backend`, so the daemon
//! wraps both implementations in one concrete type that the dispatcher and
//! the HTTP API can share.

use vigil_core::config::StoreConfig;
use vigil_core::error::StoreError;
use vigil_core::types::{Job, JobFilter, JobId, ScanResult, StatusUpdate};
use vigil_store::{JobStore, MemoryJobStore, SqliteJobStore};

/// Job store backend selected by configuration.
#[derive(Debug)]
pub enum Store {
    /// Process-local store; jobs are lost on restart.
    Memory(MemoryJobStore),
    /// SQLite database file.
    Sqlite(SqliteJobStore),
}

impl Store {
    /// Open the backend named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` for an unknown backend name or when the
    /// SQLite database cannot be opened.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend.as_str() {
            "memory" => Ok(Self::Memory(MemoryJobStore::new())),
            "sqlite" => Ok(Self::Sqlite(SqliteJobStore::open(&config.sqlite_path)?)),
            other => Err(StoreError::Backend(format!(
                "unknown store backend '{other}'"
            ))),
        }
    }
}

impl JobStore for Store {
    fn name(&self) -> &str {
        match self {
            Self::Memory(s) => s.name(),
            Self::Sqlite(s) => s.name(),
        }
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.create_job(job).await,
            Self::Sqlite(s) => s.create_job(job).await,
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        match self {
            Self::Memory(s) => s.get_job(id).await,
            Self::Sqlite(s) => s.get_job(id).await,
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        match self {
            Self::Memory(s) => s.list_jobs(filter).await,
            Self::Sqlite(s) => s.list_jobs(filter).await,
        }
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<Job, StoreError> {
        match self {
            Self::Memory(s) => s.update_status(update).await,
            Self::Sqlite(s) => s.update_status(update).await,
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.delete_job(id).await,
            Self::Sqlite(s) => s.delete_job(id).await,
        }
    }

    async fn append_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.append_result(result).await,
            Self::Sqlite(s) => s.append_result(result).await,
        }
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<ScanResult>, StoreError> {
        match self {
            Self::Memory(s) => s.list_results(job_id).await,
            Self::Sqlite(s) => s.list_results(job_id).await,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.ping().await,
            Self::Sqlite(s) => s.ping().await,
        }
    }
}
