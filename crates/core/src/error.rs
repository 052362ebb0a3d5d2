//! 에러 타입: 도메인별 에러 정의

use crate::types::{JobId, JobStatus};

/// Vigil 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 모듈 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 작업 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 상태 전이 에러
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// 스캔 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// 입력 검증 에러
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 모듈 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 작업 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 작업이 존재하지 않음
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// 같은 ID의 작업이 이미 존재함
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    /// 상태 갱신 충돌: 저장된 상태가 기대값과 다름
    #[error("status conflict for job {id}: expected {expected}, found {actual}")]
    Conflict {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// 같은 작업 안에서 결과 ID가 중복됨
    #[error("duplicate result '{result_id}' for job {job_id}")]
    DuplicateResult { job_id: JobId, result_id: String },

    /// 백엔드(DB 등) 실패
    #[error("backend failure: {0}")]
    Backend(String),

    /// 직렬화/역직렬화 실패
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// 작업이 없어서 발생한 에러인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// 상태 전이 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// 전이 표에 없는 전이
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// 스캔 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 엔진이 요청을 거부함 (잘못된 템플릿 선택자, 대상 등)
    #[error("invalid engine request: {0}")]
    InvalidRequest(String),

    /// 엔진 프로세스 기동 실패
    #[error("engine launch failed: {0}")]
    Launch(String),

    /// 실행 중 실패
    #[error("engine execution failed: {0}")]
    Execution(String),

    /// 엔진 출력 해석 실패
    #[error("engine output malformed: {0}")]
    Protocol(String),
}

/// 입력 검증 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// 필수 필드가 비어 있음
    #[error("'{field}' must not be empty")]
    Empty { field: String },

    /// 형식이 잘못된 값
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    /// 허용 범위를 벗어난 값
    #[error("'{field}' out of range: {value} (max: {max})")]
    OutOfRange { field: String, value: u64, max: u64 },
}
