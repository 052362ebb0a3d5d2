//! 메모리 저장소
//!
//! 프로세스가 종료되면 모든 작업이 사라집니다.
//! 단일 `RwLock` 아래에서 검사와 갱신을 함께 수행하므로 상태 갱신은 원자적입니다.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use vigil_core::error::StoreError;
use vigil_core::types::{Job, JobFilter, JobId, JobStatus, ScanResult, StatusUpdate};

use crate::{JobStore, sort_jobs};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, ResultLog>,
}

/// 작업 하나의 결과 목록과 ID 색인
#[derive(Debug, Default)]
struct ResultLog {
    entries: Vec<ScanResult>,
    ids: HashSet<String>,
}

impl ResultLog {
    /// 같은 ID가 이미 있으면 `false`를 반환하고 아무것도 추가하지 않습니다.
    fn push(&mut self, result: &ScanResult) -> bool {
        if !self.ids.insert(result.id.clone()) {
            return false;
        }
        self.entries.push(result.clone());
        true
    }
}

/// 프로세스 내 작업 저장소
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    /// 빈 저장소를 만듭니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 작업 수
    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    /// 저장된 작업이 없는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.jobs.is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        inner.jobs.insert(job.id, job.clone());
        inner.results.insert(job.id, ResultLog::default());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.matches(filter))
            .cloned()
            .collect();
        sort_jobs(&mut jobs);
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&update.id)
            .ok_or(StoreError::NotFound(update.id))?;
        if job.status != update.expected {
            return Err(StoreError::Conflict {
                id: update.id,
                expected: update.expected,
                actual: job.status,
            });
        }
        update.apply_to(job);
        Ok(job.clone())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        inner.results.remove(&id);
        Ok(())
    }

    async fn append_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let status = inner
            .jobs
            .get(&result.job_id)
            .map(|job| job.status)
            .ok_or(StoreError::NotFound(result.job_id))?;
        if status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id: result.job_id,
                expected: JobStatus::Running,
                actual: status,
            });
        }

        if !inner.results.entry(result.job_id).or_default().push(result) {
            return Err(StoreError::DuplicateResult {
                job_id: result.job_id,
                result_id: result.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<ScanResult>, StoreError> {
        let inner = self.inner.read().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id));
        }
        Ok(inner
            .results
            .get(&job_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
