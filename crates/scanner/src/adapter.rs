//! 실행 엔진 어댑터
//!
//! [`EngineAdapter`]는 [`ScanEngine`]을 작업 단위의 취소 가능한 실행으로 감쌉니다.
//!
//! ```text
//! Job ──start()──▶ ScanRun ──next_result()*──▶ ScanResult ...
//!                     └──finish()──▶ RunOutcome {Success | Failure | Cancelled}
//! ```
//!
//! 엔진은 별도 태스크에서 실행되며 매치 이벤트는 bounded 채널로 하나씩 전달됩니다.
//! 결과는 도착하는 즉시 저장할 수 있도록 전체 실행을 메모리에 모으지 않습니다.
//! 취소 토큰이 발동되면 `next_result()`는 더 이상 결과를 내보내지 않습니다.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::error::EngineError;
use vigil_core::types::{Job, JobId, ScanResult};

use crate::config::EngineDefaults;
use crate::engine::{EngineRequest, MatchEvent, ResolvedOptions, ScanEngine};
use crate::validate;

/// 실행 종료 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 엔진이 정상 종료함
    Success,
    /// 엔진이 실패함 (사유 포함)
    Failure(String),
    /// 취소 요청을 엔진이 수용함
    Cancelled,
}

impl RunOutcome {
    /// 메트릭 레이블 값
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "completed",
            Self::Failure(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 엔진 어댑터
pub struct EngineAdapter<E> {
    engine: Arc<E>,
    defaults: EngineDefaults,
    channel_capacity: usize,
}

impl<E: ScanEngine> EngineAdapter<E> {
    /// 새 어댑터를 생성합니다.
    pub fn new(engine: E, defaults: EngineDefaults, channel_capacity: usize) -> Self {
        Self {
            engine: Arc::new(engine),
            defaults,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// 감싼 엔진 이름
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// 작업 옵션을 엔진 기본값과 지원 범위에 맞춰 해석합니다.
    pub fn resolve_options(&self, job: &Job) -> ResolvedOptions {
        ResolvedOptions::resolve(&job.options, &self.defaults, self.engine.capabilities())
    }

    /// 작업 실행을 시작합니다.
    ///
    /// # Errors
    ///
    /// 대상이 비어 있거나 형식이 잘못되면 엔진을 띄우지 않고
    /// `EngineError::InvalidRequest`를 반환합니다.
    pub fn start(&self, job: &Job, cancel: CancellationToken) -> Result<ScanRun, EngineError> {
        validate::validate_target(&job.target)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        let options = self.resolve_options(job);
        if !options.ignored().is_empty() {
            debug!(
                job_id = %job.id,
                engine = self.engine.name(),
                ignored = ?options.ignored(),
                "engine does not honour some job options"
            );
        }

        let request = EngineRequest {
            job_id: job.id,
            target: job.target.clone(),
            template_ids: job.template_ids.clone(),
            tags: job.tags.clone(),
            options,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let engine = Arc::clone(&self.engine);
        let token = cancel.clone();
        let task = tokio::spawn(async move { engine.execute(request, tx, token).await });

        Ok(ScanRun {
            job_id: job.id,
            events: rx,
            task,
            cancel,
            next_sequence: 0,
        })
    }
}

/// 진행 중인 실행 하나
pub struct ScanRun {
    job_id: JobId,
    events: mpsc::Receiver<MatchEvent>,
    task: JoinHandle<Result<(), EngineError>>,
    cancel: CancellationToken,
    next_sequence: u64,
}

impl ScanRun {
    /// 실행 중인 작업 ID
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// 지금까지 내보낸 결과 수
    pub fn emitted(&self) -> u64 {
        self.next_sequence
    }

    /// 다음 결과를 기다립니다.
    ///
    /// 엔진 스트림이 끝났거나 취소가 발동되면 `None`을 반환합니다.
    /// 취소 이후에는 채널에 남은 이벤트가 있어도 내보내지 않습니다.
    pub async fn next_result(&mut self) -> Option<ScanResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            event = self.events.recv() => event?,
        };
        Some(self.to_result(event))
    }

    fn to_result(&mut self, event: MatchEvent) -> ScanResult {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let id = event.id.unwrap_or_else(|| {
            let prefix = if event.matcher_name.is_empty() {
                &event.template_id
            } else {
                &event.matcher_name
            };
            format!("{prefix}:{sequence}")
        });

        ScanResult {
            id,
            job_id: self.job_id,
            sequence,
            template_id: event.template_id,
            template_name: event.template_name,
            severity: event.severity,
            host: event.host,
            matcher_name: event.matcher_name,
            matched_at: event.matched_at.unwrap_or_else(SystemTime::now),
            extracted_results: event.extracted_results,
            request: event.request,
            response: event.response,
            metadata: event.metadata,
        }
    }

    /// 엔진 태스크 종료를 기다리고 최종 결과를 반환합니다.
    ///
    /// 수신 채널을 먼저 닫으므로 아직 전송 중인 엔진도 멈춥니다.
    /// 취소 토큰이 발동된 상태라면 엔진 반환값과 관계없이 `Cancelled`입니다.
    pub async fn finish(self) -> RunOutcome {
        let Self {
            job_id,
            events,
            task,
            cancel,
            ..
        } = self;
        drop(events);

        let joined = task.await;
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        match joined {
            Ok(Ok(())) => RunOutcome::Success,
            Ok(Err(e)) => RunOutcome::Failure(e.to_string()),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "engine task aborted");
                RunOutcome::Failure(format!("engine task aborted: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use vigil_core::types::{ScanOptions, Severity};

    use super::*;
    use crate::engine::OptionSupport;

    /// 설정된 이벤트를 내보낸 뒤 결과를 반환하는 엔진
    struct FixedEngine {
        events: Vec<MatchEvent>,
        fail: Option<String>,
        wait_for_cancel: bool,
    }

    impl FixedEngine {
        fn emitting(n: usize) -> Self {
            let events = (0..n)
                .map(|i| MatchEvent {
                    template_id: "t1".to_owned(),
                    matcher_name: if i % 2 == 0 { "m".to_owned() } else { String::new() },
                    host: "http://x".to_owned(),
                    severity: Severity::High,
                    ..MatchEvent::default()
                })
                .collect();
            Self {
                events,
                fail: None,
                wait_for_cancel: false,
            }
        }
    }

    impl ScanEngine for FixedEngine {
        fn name(&self) -> &str {
            "fixed"
        }

        fn capabilities(&self) -> OptionSupport {
            OptionSupport::ALL
        }

        fn execute(
            &self,
            _request: EngineRequest,
            matches: mpsc::Sender<MatchEvent>,
            cancel: CancellationToken,
        ) -> impl Future<Output = Result<(), EngineError>> + Send {
            let events = self.events.clone();
            let fail = self.fail.clone();
            let wait = self.wait_for_cancel;
            async move {
                for event in events {
                    if matches.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                if wait {
                    cancel.cancelled().await;
                }
                match fail {
                    Some(reason) => Err(EngineError::Execution(reason)),
                    None => Ok(()),
                }
            }
        }
    }

    fn job(target: &str) -> Job {
        Job::new(target, vec!["t1".to_owned()], vec![], ScanOptions::default(), SystemTime::now())
    }

    fn adapter(engine: FixedEngine) -> EngineAdapter<FixedEngine> {
        EngineAdapter::new(engine, EngineDefaults::default(), 4)
    }

    #[tokio::test]
    async fn streams_results_in_order_then_succeeds() {
        let adapter = adapter(FixedEngine::emitting(3));
        let job = job("http://x");
        let mut run = adapter.start(&job, CancellationToken::new()).unwrap();

        let mut results = Vec::new();
        while let Some(r) = run.next_result().await {
            results.push(r);
        }
        assert_eq!(run.emitted(), 3);
        assert_eq!(run.finish().await, RunOutcome::Success);

        let seqs: Vec<u64> = results.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(results[0].id, "m:0");
        // 매처 이름이 없으면 템플릿 ID 사용
        assert_eq!(results[1].id, "t1:1");
        assert!(results.iter().all(|r| r.job_id == job.id));
    }

    #[tokio::test]
    async fn engine_ids_are_kept() {
        let mut engine = FixedEngine::emitting(1);
        engine.events[0].id = Some("engine-1".to_owned());
        let adapter = adapter(engine);
        let mut run = adapter.start(&job("http://x"), CancellationToken::new()).unwrap();
        assert_eq!(run.next_result().await.unwrap().id, "engine-1");
    }

    #[tokio::test]
    async fn failure_keeps_earlier_results() {
        let mut engine = FixedEngine::emitting(2);
        engine.fail = Some("template load failed".to_owned());
        let adapter = adapter(engine);
        let mut run = adapter.start(&job("http://x"), CancellationToken::new()).unwrap();

        let mut count = 0;
        while run.next_result().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
        match run.finish().await {
            RunOutcome::Failure(reason) => assert!(reason.contains("template load failed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_results_and_reports_cancelled() {
        let mut engine = FixedEngine::emitting(1);
        engine.wait_for_cancel = true;
        let adapter = adapter(engine);
        let cancel = CancellationToken::new();
        let mut run = adapter.start(&job("http://x"), cancel.clone()).unwrap();

        assert!(run.next_result().await.is_some());
        cancel.cancel();
        assert!(run.next_result().await.is_none());
        assert_eq!(run.finish().await, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_before_start_emits_nothing() {
        let adapter = adapter(FixedEngine::emitting(3));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut run = adapter.start(&job("http://x"), cancel).unwrap();
        assert!(run.next_result().await.is_none());
        assert_eq!(run.finish().await, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn empty_target_is_rejected_before_launch() {
        let adapter = adapter(FixedEngine::emitting(1));
        let err = adapter
            .start(&job(""), CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(RunOutcome::Success.label(), "completed");
        assert_eq!(RunOutcome::Failure("x".to_owned()).label(), "failed");
        assert_eq!(RunOutcome::Cancelled.label(), "cancelled");
    }
}
