//! 제출/조회 API
//!
//! [`ScanService`]는 새 작업을 만드는 유일한 경로이며, 조회와 취소 요청,
//! 삭제를 담당합니다. 상태 전이는 디스패처만 수행하므로 이 모듈은
//! 저장소에 `create_job`과 `delete_job` 외의 쓰기를 하지 않습니다.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vigil_core::metrics as m;
use vigil_core::pipeline::HealthStatus;
use vigil_core::types::{Job, JobFilter, JobId, JobStatus, ScanOptions, ScanResult};
use vigil_store::JobStore;

use crate::error::ScannerError;
use crate::registry::CancellationRegistry;
use crate::validate;

/// 작업 제출 요청
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// 스캔 대상 (URL 또는 호스트)
    pub target: String,
    /// 템플릿 ID
    #[serde(default)]
    pub template_ids: Vec<String>,
    /// 템플릿 태그
    #[serde(default)]
    pub tags: Vec<String>,
    /// 엔진 옵션
    #[serde(default)]
    pub options: ScanOptions,
}

impl SubmitRequest {
    /// 대상만 지정한 요청을 만듭니다.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// 템플릿 ID를 추가합니다.
    pub fn template(mut self, id: impl Into<String>) -> Self {
        self.template_ids.push(id.into());
        self
    }

    /// 태그를 추가합니다.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// 옵션을 설정합니다.
    pub fn options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<(), ScannerError> {
        validate::validate_target(&self.target)?;
        validate::validate_selectors("template_ids", &self.template_ids)?;
        validate::validate_selectors("tags", &self.tags)?;
        validate::validate_options(&self.options)?;
        Ok(())
    }
}

/// 취소 요청 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 실행 중인 작업에 취소 신호를 보냄
    Requested,
    /// 실행 중인 작업이 없음 (현재 저장된 상태 포함)
    NotRunning(JobStatus),
    /// 저장된 상태는 `Running`이지만 취소할 실행이 없음 (방금 끝났거나 이미 취소됨)
    NoExecution,
}

/// 작업 제출/조회 서비스
pub struct ScanService<S> {
    store: Arc<S>,
    registry: Arc<CancellationRegistry>,
}

impl<S> Clone for ScanService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: JobStore> ScanService<S> {
    /// 새 서비스를 생성합니다. 디스패처와 같은 레지스트리를 공유해야 합니다.
    pub fn new(store: Arc<S>, registry: Arc<CancellationRegistry>) -> Self {
        Self { store, registry }
    }

    /// 작업을 검증하고 `Pending` 상태로 저장합니다.
    ///
    /// 실행을 기다리지 않고 생성된 작업을 바로 반환합니다.
    ///
    /// # Errors
    ///
    /// 검증 실패 시 `ScannerError::Validation`을 반환하며 작업은 생성되지 않습니다.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, ScannerError> {
        request.validate()?;

        let job = Job::new(
            request.target,
            request.template_ids,
            request.tags,
            request.options,
            SystemTime::now(),
        );
        self.store.create_job(&job).await?;

        metrics::counter!(m::JOBS_SUBMITTED_TOTAL).increment(1);
        info!(job_id = %job.id, target = %job.target, "scan job submitted");
        Ok(job)
    }

    /// 작업을 조회합니다.
    pub async fn get(&self, id: JobId) -> Result<Job, ScannerError> {
        Ok(self.store.get_job(id).await?)
    }

    /// 필터 조건을 모두 만족하는 작업을 생성 순서로 조회합니다.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, ScannerError> {
        Ok(self.store.list_jobs(filter).await?)
    }

    /// 작업의 결과를 저장 순서로 조회합니다. 실행 중이면 지금까지의 결과입니다.
    pub async fn results(&self, id: JobId) -> Result<Vec<ScanResult>, ScannerError> {
        Ok(self.store.list_results(id).await?)
    }

    /// 실행 중인 작업에 취소를 요청합니다.
    ///
    /// `Pending` 작업은 영향을 받지 않습니다. 취소는 신호만 보내며
    /// 작업은 엔진이 멈춘 뒤 디스패처에 의해 `Cancelled`가 됩니다.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, ScannerError> {
        let job = self.store.get_job(id).await?;
        if job.status != JobStatus::Running {
            debug!(job_id = %id, status = %job.status, "cancel ignored, job is not running");
            return Ok(CancelOutcome::NotRunning(job.status));
        }

        if self.registry.cancel(id) {
            info!(job_id = %id, "scan cancellation requested");
            Ok(CancelOutcome::Requested)
        } else {
            // 방금 끝났거나 다른 요청이 먼저 취소함
            debug!(job_id = %id, "no running execution found for job");
            Ok(CancelOutcome::NoExecution)
        }
    }

    /// 작업과 모든 결과를 삭제합니다.
    ///
    /// 실행 중이면 먼저 취소를 요청합니다. 핸들을 찾지 못해도 삭제는 진행합니다.
    /// 삭제에 성공하면 `true`를 반환합니다.
    ///
    /// # Errors
    ///
    /// 작업이 없으면 `StoreError::NotFound`를 반환합니다.
    pub async fn delete(&self, id: JobId) -> Result<bool, ScannerError> {
        let job = self.store.get_job(id).await?;

        let mut signalled = false;
        if job.status == JobStatus::Running {
            signalled = self.registry.cancel(id);
            if !signalled {
                info!(job_id = %id, "running job had no cancellation handle, deleting anyway");
            }
        }

        self.store.delete_job(id).await?;
        info!(job_id = %id, signalled, "scan job deleted");
        Ok(true)
    }

    /// 저장소 연결 상태를 확인합니다.
    pub async fn health(&self) -> HealthStatus {
        match self.store.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(format!("job store unreachable: {e}")),
        }
    }

    /// 저장소 이름
    pub fn store_name(&self) -> &str {
        self.store.name()
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use vigil_core::error::ValidationError;
    use vigil_core::lifecycle::JobEvent;
    use vigil_store::MemoryJobStore;

    use super::*;

    fn service() -> (ScanService<MemoryJobStore>, Arc<MemoryJobStore>, Arc<CancellationRegistry>) {
        let store = Arc::new(MemoryJobStore::new());
        let registry = Arc::new(CancellationRegistry::new());
        (
            ScanService::new(Arc::clone(&store), Arc::clone(&registry)),
            store,
            registry,
        )
    }

    async fn mark_running(store: &MemoryJobStore, job: &mut Job) {
        let update = job.apply(JobEvent::Claimed, SystemTime::now()).unwrap();
        store.update_status(&update).await.unwrap();
    }

    #[tokio::test]
    async fn submit_creates_pending_job() {
        let (svc, _, _) = service();
        let job = svc
            .submit(SubmitRequest::new("http://x").template("t1"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(svc.get(job.id).await.unwrap(), job);
        assert!(svc.results(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_submission_creates_nothing() {
        let (svc, store, _) = service();
        let err = svc.submit(SubmitRequest::new("")).await.unwrap_err();
        assert!(matches!(
            err,
            ScannerError::Validation(ValidationError::Empty { .. })
        ));

        let err = svc
            .submit(SubmitRequest::new("http://x").tag("a b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_pending_is_noop() {
        let (svc, _, _) = service();
        let job = svc.submit(SubmitRequest::new("http://x")).await.unwrap();
        assert_eq!(
            svc.cancel(job.id).await.unwrap(),
            CancelOutcome::NotRunning(JobStatus::Pending)
        );
        assert_eq!(svc.get(job.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_running_fires_handle_once() {
        let (svc, store, registry) = service();
        let mut job = svc.submit(SubmitRequest::new("http://x")).await.unwrap();
        mark_running(&store, &mut job).await;
        let token = CancellationToken::new();
        registry.register(job.id, token.clone()).unwrap();

        assert_eq!(svc.cancel(job.id).await.unwrap(), CancelOutcome::Requested);
        assert!(token.is_cancelled());
        assert_eq!(svc.cancel(job.id).await.unwrap(), CancelOutcome::NoExecution);
    }

    #[tokio::test]
    async fn delete_running_signals_and_removes() {
        let (svc, store, registry) = service();
        let mut job = svc.submit(SubmitRequest::new("http://x")).await.unwrap();
        mark_running(&store, &mut job).await;
        let token = CancellationToken::new();
        registry.register(job.id, token.clone()).unwrap();

        assert!(svc.delete(job.id).await.unwrap());
        assert!(token.is_cancelled());
        assert!(svc.get(job.id).await.unwrap_err().is_not_found());
        assert!(svc.results(job.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_running_without_handle_still_deletes() {
        let (svc, store, _) = service();
        let mut job = svc.submit(SubmitRequest::new("http://x")).await.unwrap();
        mark_running(&store, &mut job).await;

        assert!(svc.delete(job.id).await.unwrap());
        assert!(svc.get(job.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_pending_reports_success() {
        let (svc, _, registry) = service();
        let job = svc.submit(SubmitRequest::new("http://x")).await.unwrap();

        assert!(svc.delete(job.id).await.unwrap());
        assert!(registry.is_empty());
        assert!(svc.get(job.id).await.unwrap_err().is_not_found());
        assert!(svc.results(job.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (svc, _, _) = service();
        let id = JobId::generate();
        assert!(svc.get(id).await.unwrap_err().is_not_found());
        assert!(svc.cancel(id).await.unwrap_err().is_not_found());
        assert!(svc.delete(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn health_reports_store() {
        let (svc, _, _) = service();
        assert!(svc.health().await.is_healthy());
        assert_eq!(svc.store_name(), "memory");
    }
}
