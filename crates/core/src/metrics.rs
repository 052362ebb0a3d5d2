//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `vigil_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(vigil_core::metrics::JOBS_SUBMITTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 종료 결과 레이블 키 (completed, failed, cancelled)
pub const LABEL_OUTCOME: &str = "outcome";

// ─── 작업 메트릭 ───────────────────────────────────────────────────

/// 제출된 작업 수 (counter)
pub const JOBS_SUBMITTED_TOTAL: &str = "vigil_jobs_submitted_total";

/// 디스패처가 가져간 작업 수 (counter)
pub const JOBS_CLAIMED_TOTAL: &str = "vigil_jobs_claimed_total";

/// 종료된 작업 수 (counter, label: outcome)
pub const JOBS_FINISHED_TOTAL: &str = "vigil_jobs_finished_total";

/// 저장된 스캔 결과 수 (counter)
pub const RESULTS_PERSISTED_TOTAL: &str = "vigil_results_persisted_total";

/// 디스패치 중 저장 실패 수 (counter)
pub const PERSIST_ERRORS_TOTAL: &str = "vigil_persist_errors_total";

/// 디스패치 틱 수 (counter)
pub const DISPATCH_TICKS_TOTAL: &str = "vigil_dispatch_ticks_total";

/// 현재 실행 중인 작업 수 (gauge)
pub const RUNNING_JOBS: &str = "vigil_running_jobs";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다. 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(JOBS_SUBMITTED_TOTAL, "Total number of scan jobs accepted");
    describe_counter!(
        JOBS_CLAIMED_TOTAL,
        "Total number of jobs transitioned from pending to running"
    );
    describe_counter!(
        JOBS_FINISHED_TOTAL,
        "Total number of jobs that reached a terminal state, by outcome"
    );
    describe_counter!(
        RESULTS_PERSISTED_TOTAL,
        "Total number of scan results appended to the job store"
    );
    describe_counter!(
        PERSIST_ERRORS_TOTAL,
        "Total number of job store writes that failed during dispatch"
    );
    describe_counter!(DISPATCH_TICKS_TOTAL, "Total number of dispatcher ticks");
    describe_gauge!(RUNNING_JOBS, "Number of scan jobs currently executing");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        JOBS_SUBMITTED_TOTAL,
        JOBS_CLAIMED_TOTAL,
        JOBS_FINISHED_TOTAL,
        RESULTS_PERSISTED_TOTAL,
        PERSIST_ERRORS_TOTAL,
        DISPATCH_TICKS_TOTAL,
        RUNNING_JOBS,
    ];

    #[test]
    fn all_metrics_start_with_vigil_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("vigil_"),
                "Metric '{}' does not start with 'vigil_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES.iter().filter(|n| **n != RUNNING_JOBS) {
            assert!(name.ends_with("_total"), "counter '{name}' lacks _total suffix");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }
}
