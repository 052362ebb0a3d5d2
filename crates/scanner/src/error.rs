//! 스캐너 에러 타입
//!
//! [`ScannerError`]는 디스패처, 어댑터, 레지스트리, 제출 API에서 발생하는 에러입니다.
//! `From<ScannerError> for VigilError` 구현으로 `?` 연산자를 통해
//! 상위 에러 타입으로 전파됩니다.

use vigil_core::error::{
    ConfigError, EngineError, LifecycleError, StoreError, ValidationError, VigilError,
};
use vigil_core::types::{JobId, JobStatus};

/// 스캐너 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 제출 입력 검증 실패
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 저장소 에러
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 엔진 에러
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 허용되지 않는 상태 전이
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// 같은 작업의 취소 핸들이 이미 등록됨 (이중 claim)
    #[error("cancellation handle already registered for job {0}")]
    AlreadyRegistered(JobId),
}

impl ScannerError {
    /// 작업이 없어서 발생한 에러인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

impl From<ScannerError> for VigilError {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::Config { field, reason } => {
                VigilError::Config(ConfigError::InvalidValue { field, reason })
            }
            ScannerError::Validation(e) => VigilError::Validation(e),
            ScannerError::Store(e) => VigilError::Store(e),
            ScannerError::Engine(e) => VigilError::Engine(e),
            ScannerError::Lifecycle(e) => VigilError::Lifecycle(e),
            // 이미 실행 중인 작업을 다시 실행 상태로 옮기려는 시도
            ScannerError::AlreadyRegistered(_) => {
                VigilError::Lifecycle(LifecycleError::InvalidTransition {
                    from: JobStatus::Running,
                    to: JobStatus::Running,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ScannerError::Config {
            field: "max_concurrent_scans".to_owned(),
            reason: "must be 1-256".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("max_concurrent_scans"));
        assert!(msg.contains("1-256"));
    }

    #[test]
    fn store_not_found_is_detected() {
        let err: ScannerError = StoreError::NotFound(JobId::generate()).into();
        assert!(err.is_not_found());

        let err: ScannerError = ValidationError::Empty {
            field: "target".to_owned(),
        }
        .into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err: ScannerError = ValidationError::Empty {
            field: "target".to_owned(),
        }
        .into();
        assert_eq!(err.to_string(), "'target' must not be empty");
    }

    #[test]
    fn converts_to_vigil_error() {
        let err = ScannerError::Config {
            field: "f".to_owned(),
            reason: "r".to_owned(),
        };
        assert!(matches!(
            VigilError::from(err),
            VigilError::Config(ConfigError::InvalidValue { .. })
        ));

        let err: ScannerError = StoreError::Backend("down".to_owned()).into();
        assert!(matches!(VigilError::from(err), VigilError::Store(_)));

        let err = ScannerError::AlreadyRegistered(JobId::generate());
        assert!(matches!(VigilError::from(err), VigilError::Lifecycle(_)));
    }
}
