//! 파이프라인 trait: 장기 실행 컴포넌트의 생명주기
//!
//! 디스패처처럼 백그라운드 태스크를 소유하는 컴포넌트는 [`Pipeline`]을 구현하여
//! 데몬이 동일한 방식으로 시작/정지/상태 확인을 할 수 있게 합니다.

use std::future::Future;

use serde::Serialize;

use crate::error::VigilError;

/// 컴포넌트 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 시작/정지 가능한 장기 실행 컴포넌트
///
/// # 생명주기
/// ```text
/// Created → start() → Running → stop() → Stopped
/// ```
///
/// `start`를 두 번 호출하면 `PipelineError::AlreadyRunning`,
/// 실행 중이 아닐 때 `stop`을 호출하면 `PipelineError::NotRunning`을 반환합니다.
pub trait Pipeline: Send + Sync {
    /// 컴포넌트를 시작합니다. 백그라운드 태스크를 띄우고 즉시 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), VigilError>> + Send;

    /// 컴포넌트를 정지합니다. 진행 중인 작업을 정리한 뒤 반환합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), VigilError>> + Send;

    /// 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Degraded("slow".to_owned()).is_healthy());
        assert!(!HealthStatus::Degraded("slow".to_owned()).is_unhealthy());
        assert!(HealthStatus::Unhealthy("down".to_owned()).is_unhealthy());
    }

    #[test]
    fn health_serializes_with_reason() {
        let json = serde_json::to_value(HealthStatus::Unhealthy("store down".to_owned())).unwrap();
        assert_eq!(json["state"], "unhealthy");
        assert_eq!(json["reason"], "store down");

        let json = serde_json::to_value(HealthStatus::Healthy).unwrap();
        assert_eq!(json["state"], "healthy");
    }
}
