//! 디스패처: 폴링 기반 작업 실행기
//!
//! 고정 주기마다 `Pending` 작업을 조회하여 빈 실행 슬롯 수만큼 가져가고(claim),
//! 작업마다 독립된 태스크에서 엔진을 실행합니다.
//!
//! # 틱 처리 흐름
//!
//! ```text
//! tick ─┬─ list(Pending) ── 생성 순서
//!       └─ 작업마다:
//!            슬롯 확보 → 취소 핸들 등록 → Pending→Running 저장 ─┬─ 실패: 핸들 해제, 다음 틱에 재시도
//!                                                             └─ 성공: 실행 태스크 spawn
//! 실행 태스크:
//!   결과 도착마다 append → 스트림 종료 → 핸들 해제 → 종료 상태 저장
//! ```
//!
//! 틱은 겹치지 않습니다. 다음 틱은 이전 틱의 claim 단계가 끝난 뒤에만 시작합니다.
//! 한 작업의 실패(엔진, 저장소)는 같은 틱의 다른 작업에 영향을 주지 않습니다.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use vigil_core::error::{PipelineError, StoreError, VigilError};
use vigil_core::lifecycle::JobEvent;
use vigil_core::metrics as m;
use vigil_core::pipeline::{HealthStatus, Pipeline};
use vigil_core::types::{Job, JobFilter, JobStatus};
use vigil_store::JobStore;

use crate::adapter::{EngineAdapter, RunOutcome};
use crate::config::ScannerConfig;
use crate::engine::ScanEngine;
use crate::error::ScannerError;
use crate::registry::CancellationRegistry;
use crate::service::ScanService;

/// 재시작으로 중단된 작업에 기록되는 실패 사유
pub const ORPHAN_ERROR: &str = "interrupted: dispatcher restarted while scan was running";

/// 디스패처 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatcherState {
    Initialized,
    Running,
    Stopped,
}

/// 틱 하나의 처리 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// 실행을 시작한 작업 수
    pub claimed: usize,
    /// 틱이 끝났을 때 빈 슬롯이 남지 않았는지 여부
    pub saturated: bool,
    /// claim 저장에 실패한 작업 수 (`Pending`으로 남음)
    pub failed: usize,
}

/// 실행 태스크들이 공유하는 상태
struct Shared<S, E> {
    store: Arc<S>,
    adapter: EngineAdapter<E>,
    registry: Arc<CancellationRegistry>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    tick_lock: Mutex<()>,
}

/// 폴링 디스패처
///
/// core의 [`Pipeline`] trait을 구현합니다. `stop()` 후 재시작하려면
/// [`ScannerBuilder`]로 새 인스턴스를 만들어야 합니다.
pub struct Dispatcher<S, E> {
    config: ScannerConfig,
    state: DispatcherState,
    shared: Arc<Shared<S, E>>,
    loop_task: Option<JoinHandle<()>>,
}

impl<S: JobStore, E: ScanEngine> Dispatcher<S, E> {
    /// 새 디스패처를 생성합니다. 보통 [`ScannerBuilder`]를 사용합니다.
    pub fn new(
        config: ScannerConfig,
        store: Arc<S>,
        engine: E,
        registry: Arc<CancellationRegistry>,
    ) -> Self {
        let adapter = EngineAdapter::new(
            engine,
            config.engine_defaults,
            config.result_channel_capacity,
        );
        let shared = Shared {
            store,
            adapter,
            registry,
            slots: Arc::new(Semaphore::new(config.max_concurrent_scans)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            tick_lock: Mutex::new(()),
        };
        Self {
            config,
            state: DispatcherState::Initialized,
            shared: Arc::new(shared),
            loop_task: None,
        }
    }

    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            DispatcherState::Initialized => "initialized",
            DispatcherState::Running => "running",
            DispatcherState::Stopped => "stopped",
        }
    }

    /// 실행 중인 작업 수
    pub fn running_jobs(&self) -> usize {
        self.shared.tracker.len()
    }

    /// 틱 하나를 즉시 실행합니다.
    ///
    /// 주기 루프와 같은 잠금을 사용하므로 루프의 틱과 겹치지 않습니다.
    /// 실행 태스크는 spawn만 하고 종료를 기다리지 않습니다.
    pub async fn tick_now(&self) -> TickSummary {
        self.shared.tick().await
    }

    /// 실행 중인 작업이 모두 끝날 때까지 기다립니다.
    pub async fn wait_idle(&self) {
        let tracker = &self.shared.tracker;
        tracker.close();
        tracker.wait().await;
        if self.state != DispatcherState::Stopped {
            tracker.reopen();
        }
    }

    /// 이 프로세스가 실행하고 있지 않은 `Running` 작업을 `Failed`로 정리합니다.
    ///
    /// 재시작 후에는 취소 핸들이 남아 있지 않으므로 이전 프로세스의 `Running` 작업은
    /// 취소도 완료도 될 수 없습니다. 정리한 작업 수를 반환합니다.
    pub async fn recover_orphans(&self) -> Result<usize, StoreError> {
        let shared = &self.shared;
        let running = shared
            .store
            .list_jobs(&JobFilter::status(JobStatus::Running))
            .await?;

        let mut recovered = 0;
        for mut job in running {
            if shared.registry.contains(job.id) {
                continue;
            }
            let update = match job.apply(JobEvent::Failed(ORPHAN_ERROR.to_owned()), SystemTime::now()) {
                Ok(update) => update,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "cannot recover orphaned job");
                    continue;
                }
            };
            match shared.store.update_status(&update).await {
                Ok(_) => {
                    warn!(job_id = %job.id, target = %job.target, "orphaned running job marked failed");
                    metrics::counter!(m::JOBS_FINISHED_TOTAL, m::LABEL_OUTCOME => "failed")
                        .increment(1);
                    recovered += 1;
                }
                Err(e @ (StoreError::NotFound(_) | StoreError::Conflict { .. })) => {
                    debug!(job_id = %job.id, error = %e, "orphan changed before recovery");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }
}

impl<S: JobStore, E: ScanEngine> Shared<S, E> {
    async fn tick(self: &Arc<Self>) -> TickSummary {
        let _guard = self.tick_lock.lock().await;
        metrics::counter!(m::DISPATCH_TICKS_TOTAL).increment(1);

        let mut summary = TickSummary::default();
        if self.shutdown.is_cancelled() {
            return summary;
        }

        let free = self.slots.available_permits();
        if free == 0 {
            summary.saturated = true;
            return summary;
        }

        // 빈 슬롯 수만큼만 가져옴
        let filter = JobFilter::status(JobStatus::Pending).with_limit(free);
        let pending = match self.store.list_jobs(&filter).await {
            Ok(jobs) => jobs,
            Err(e) => {
                metrics::counter!(m::PERSIST_ERRORS_TOTAL).increment(1);
                warn!(error = %e, "failed to list pending jobs");
                return summary;
            }
        };

        for job in pending {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            match self.claim(job).await {
                Some((job, cancel)) => {
                    summary.claimed += 1;
                    let shared = Arc::clone(self);
                    self.tracker
                        .spawn(async move { shared.execute(job, cancel, permit).await });
                }
                None => summary.failed += 1,
            }
        }

        summary.saturated = self.slots.available_permits() == 0;
        if summary.claimed > 0 || summary.failed > 0 {
            debug!(
                claimed = summary.claimed,
                saturated = summary.saturated,
                failed = summary.failed,
                "dispatch tick finished"
            );
        }
        summary
    }

    /// 핸들을 등록하고 `Running` 전이를 저장합니다. 실패하면 작업은 `Pending`으로 남습니다.
    async fn claim(&self, mut job: Job) -> Option<(Job, CancellationToken)> {
        let cancel = CancellationToken::new();
        if let Err(e) = self.registry.register(job.id, cancel.clone()) {
            error!(job_id = %job.id, error = %e, "job claimed twice");
            return None;
        }

        let update = match job.apply(JobEvent::Claimed, SystemTime::now()) {
            Ok(update) => update,
            Err(e) => {
                self.registry.release(job.id);
                warn!(job_id = %job.id, error = %e, "job is not claimable");
                return None;
            }
        };

        match self.store.update_status(&update).await {
            Ok(_) => {
                metrics::counter!(m::JOBS_CLAIMED_TOTAL).increment(1);
                info!(job_id = %job.id, target = %job.target, "scan job started");
                Some((job, cancel))
            }
            Err(e) => {
                self.registry.release(job.id);
                metrics::counter!(m::PERSIST_ERRORS_TOTAL).increment(1);
                match e {
                    StoreError::Conflict { .. } | StoreError::NotFound(_) => {
                        warn!(job_id = %job.id, error = %e, "job changed before claim, skipping");
                    }
                    _ => {
                        warn!(job_id = %job.id, error = %e, "failed to persist claim, will retry next tick");
                    }
                }
                None
            }
        }
    }

    async fn execute(&self, mut job: Job, cancel: CancellationToken, permit: OwnedSemaphorePermit) {
        metrics::gauge!(m::RUNNING_JOBS).increment(1.0);

        let mut lost = LostResults::default();
        let outcome = match self.adapter.start(&job, cancel.clone()) {
            Ok(mut run) => {
                while let Some(result) = run.next_result().await {
                    match self.store.append_result(&result).await {
                        Ok(()) => {
                            metrics::counter!(m::RESULTS_PERSISTED_TOTAL).increment(1);
                            debug!(job_id = %job.id, result = %result, "scan result stored");
                        }
                        Err(e @ (StoreError::NotFound(_) | StoreError::Conflict { .. })) => {
                            // 삭제되었거나 더 이상 Running이 아님
                            info!(job_id = %job.id, error = %e, "job no longer accepts results, stopping scan");
                            cancel.cancel();
                            break;
                        }
                        Err(e) => {
                            metrics::counter!(m::PERSIST_ERRORS_TOTAL).increment(1);
                            error!(job_id = %job.id, result_id = %result.id, error = %e, "failed to store scan result");
                            lost.record(e);
                        }
                    }
                }
                run.finish().await
            }
            Err(e) => RunOutcome::Failure(e.to_string()),
        };
        let outcome = lost.apply(outcome);

        self.registry.release(job.id);

        let label = outcome.label();
        let event = match outcome {
            RunOutcome::Success => JobEvent::Succeeded,
            RunOutcome::Failure(reason) => JobEvent::Failed(reason),
            RunOutcome::Cancelled => JobEvent::Cancelled,
        };

        match job.apply(event, SystemTime::now()) {
            Ok(update) => match self.store.update_status(&update).await {
                Ok(_) => {
                    metrics::counter!(m::JOBS_FINISHED_TOTAL, m::LABEL_OUTCOME => label)
                        .increment(1);
                    match job.error.as_deref() {
                        Some(reason) => warn!(job_id = %job.id, reason, "scan job failed"),
                        None => info!(job_id = %job.id, status = %job.status, "scan job finished"),
                    }
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(job_id = %job.id, "job deleted before its final state was stored");
                }
                Err(e) => {
                    metrics::counter!(m::PERSIST_ERRORS_TOTAL).increment(1);
                    error!(job_id = %job.id, status = %update.status, error = %e, "failed to store final job state");
                }
            },
            Err(e) => error!(job_id = %job.id, error = %e, "invalid final transition"),
        }

        metrics::gauge!(m::RUNNING_JOBS).decrement(1.0);
        drop(permit);
    }
}

/// 저장하지 못한 결과 집계
///
/// 결과를 하나라도 잃은 실행은 성공으로 끝나지 않습니다.
/// 취소된 실행은 그대로 `Cancelled`로 남습니다.
#[derive(Debug, Default)]
struct LostResults {
    count: usize,
    last_error: Option<StoreError>,
}

impl LostResults {
    fn record(&mut self, error: StoreError) {
        self.count += 1;
        self.last_error = Some(error);
    }

    fn reason(&self) -> Option<String> {
        let error = self.last_error.as_ref()?;
        Some(format!(
            "{} results could not be persisted: {error}",
            self.count
        ))
    }

    fn apply(&self, outcome: RunOutcome) -> RunOutcome {
        let Some(reason) = self.reason() else {
            return outcome;
        };
        match outcome {
            RunOutcome::Success => RunOutcome::Failure(reason),
            RunOutcome::Failure(engine) => RunOutcome::Failure(format!("{engine}; {reason}")),
            RunOutcome::Cancelled => RunOutcome::Cancelled,
        }
    }
}

impl<S: JobStore, E: ScanEngine> Pipeline for Dispatcher<S, E> {
    async fn start(&mut self) -> Result<(), VigilError> {
        match self.state {
            DispatcherState::Running => return Err(PipelineError::AlreadyRunning.into()),
            DispatcherState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "dispatcher cannot be restarted after stop".to_owned(),
                )
                .into());
            }
            DispatcherState::Initialized => {}
        }

        info!(
            engine = self.shared.adapter.engine_name(),
            store = self.shared.store.name(),
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrent_scans = self.config.max_concurrent_scans,
            "starting dispatcher"
        );

        if self.config.recover_orphans {
            let recovered = self.recover_orphans().await?;
            if recovered > 0 {
                warn!(recovered, "recovered orphaned running jobs");
            }
        }

        let shared = Arc::clone(&self.shared);
        let period = self.config.poll_interval();
        self.loop_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shared.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                shared.tick().await;
            }
            debug!("dispatch loop exited");
        }));

        self.state = DispatcherState::Running;
        info!("dispatcher started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VigilError> {
        if self.state != DispatcherState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!(running = self.shared.tracker.len(), "stopping dispatcher");
        let shared = &self.shared;
        shared.shutdown.cancel();
        if let Some(task) = self.loop_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "dispatch loop task failed");
        }

        shared.tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace(), shared.tracker.wait())
            .await
            .is_err()
        {
            let cancelled = shared.registry.cancel_all();
            warn!(cancelled, "shutdown grace period elapsed, cancelling running scans");
            if tokio::time::timeout(self.config.drain_timeout(), shared.tracker.wait())
                .await
                .is_err()
            {
                warn!(
                    remaining = shared.tracker.len(),
                    "scans did not stop within drain timeout"
                );
            }
        }

        self.state = DispatcherState::Stopped;
        info!("dispatcher stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            DispatcherState::Running => match self.shared.store.ping().await {
                Ok(()) => HealthStatus::Healthy,
                Err(e) => HealthStatus::Degraded(format!("job store unreachable: {e}")),
            },
            DispatcherState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            DispatcherState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 디스패처와 제출 서비스를 함께 구성하는 빌더
///
/// 둘은 같은 저장소와 같은 [`CancellationRegistry`]를 공유해야 취소가 동작합니다.
pub struct ScannerBuilder<S, E> {
    store: Arc<S>,
    engine: E,
    config: ScannerConfig,
    registry: Option<Arc<CancellationRegistry>>,
}

impl<S: JobStore, E: ScanEngine> ScannerBuilder<S, E> {
    /// 새 빌더를 생성합니다.
    pub fn new(store: Arc<S>, engine: E) -> Self {
        Self {
            store,
            engine,
            config: ScannerConfig::default(),
            registry: None,
        }
    }

    /// 스캐너 설정을 지정합니다.
    pub fn config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    /// 외부 레지스트리를 사용합니다. 설정하지 않으면 새로 생성합니다.
    pub fn registry(mut self, registry: Arc<CancellationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 설정을 검증하고 디스패처와 서비스를 생성합니다.
    pub fn build(self) -> Result<(Dispatcher<S, E>, ScanService<S>), ScannerError> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(CancellationRegistry::new()));
        let service = ScanService::new(Arc::clone(&self.store), Arc::clone(&registry));
        let dispatcher = Dispatcher::new(self.config, self.store, self.engine, registry);
        Ok((dispatcher, service))
    }
}
