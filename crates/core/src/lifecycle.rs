//! 작업 생명주기 상태 기계
//!
//! ```text
//! Pending ──claimed──▶ Running ──succeeded──▶ Completed
//!                        │ ──failed────────▶ Failed
//!                        └──cancelled──────▶ Cancelled
//! ```
//!
//! 종료 상태에서는 어떤 전이도 허용되지 않습니다.
//! 삭제는 전이가 아니라 행 제거이므로 이 모듈에서 다루지 않습니다.

use std::time::SystemTime;

use crate::error::LifecycleError;
use crate::types::{Job, JobStatus, StatusUpdate};

/// 상태 전이를 일으키는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// 디스패처가 작업을 가져감
    Claimed,
    /// 엔진 실행 성공
    Succeeded,
    /// 엔진 실행 실패 (사유 포함)
    Failed(String),
    /// 취소 요청을 엔진이 수용함
    Cancelled,
}

impl JobEvent {
    /// 이벤트가 도달시키는 상태
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Claimed => JobStatus::Running,
            Self::Succeeded => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

impl JobStatus {
    /// 전이 표에 정의된 전이인지 확인합니다.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl Job {
    /// 이벤트를 적용하고 저장소에 보낼 [`StatusUpdate`]를 반환합니다.
    ///
    /// 전이가 허용되지 않으면 작업은 변경되지 않습니다.
    /// 시계가 뒤로 가더라도 `updated_at`은 감소하지 않습니다.
    pub fn apply(&mut self, event: JobEvent, now: SystemTime) -> Result<StatusUpdate, LifecycleError> {
        let from = self.status;
        let to = event.target();
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        let now = now.max(self.updated_at);
        match event {
            JobEvent::Claimed => {
                self.started_at = Some(now);
            }
            JobEvent::Failed(reason) => {
                self.error = Some(reason);
                self.completed_at = Some(now);
            }
            JobEvent::Succeeded | JobEvent::Cancelled => {
                self.completed_at = Some(now);
            }
        }
        self.status = to;
        self.updated_at = now;

        Ok(StatusUpdate {
            id: self.id,
            expected: from,
            status: to,
            error: self.error.clone(),
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::ScanOptions;

    fn pending_job(now: SystemTime) -> Job {
        Job::new("http://x", vec!["t1".to_owned()], vec![], ScanOptions::default(), now)
    }

    #[test]
    fn only_table_transitions_are_allowed() {
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                let expected = matches!(
                    (from, to),
                    (JobStatus::Pending, JobStatus::Running)
                        | (JobStatus::Running, JobStatus::Completed)
                        | (JobStatus::Running, JobStatus::Failed)
                        | (JobStatus::Running, JobStatus::Cancelled)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn claim_sets_started_at() {
        let t0 = SystemTime::now();
        let mut job = pending_job(t0);
        let update = job.apply(JobEvent::Claimed, t0 + Duration::from_secs(1)).unwrap();

        assert_eq!(update.expected, JobStatus::Pending);
        assert_eq!(update.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(t0 + Duration::from_secs(1)));
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn failure_records_reason_and_completion() {
        let t0 = SystemTime::now();
        let mut job = pending_job(t0);
        job.apply(JobEvent::Claimed, t0).unwrap();
        let update = job
            .apply(JobEvent::Failed("bad template".to_owned()), t0 + Duration::from_secs(2))
            .unwrap();

        assert_eq!(update.status, JobStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("bad template"));
        assert!(job.completed_at.is_some());
        assert!(job.completed_at >= job.started_at);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let t0 = SystemTime::now();
        let mut job = pending_job(t0);
        job.apply(JobEvent::Claimed, t0).unwrap();
        job.apply(JobEvent::Cancelled, t0).unwrap();

        let before = job.clone();
        let err = job.apply(JobEvent::Claimed, t0).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: JobStatus::Cancelled,
                to: JobStatus::Running
            }
        );
        assert!(job.apply(JobEvent::Failed("late".to_owned()), t0).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut job = pending_job(SystemTime::now());
        assert!(job.apply(JobEvent::Succeeded, SystemTime::now()).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let t0 = SystemTime::now();
        let mut job = pending_job(t0);
        let earlier = t0 - Duration::from_secs(60);

        job.apply(JobEvent::Claimed, earlier).unwrap();
        job.apply(JobEvent::Succeeded, earlier).unwrap();

        let started = job.started_at.unwrap();
        let completed = job.completed_at.unwrap();
        assert!(started >= job.created_at);
        assert!(completed >= started);
        assert_eq!(job.updated_at, completed);
    }
}
