//! 도메인 타입: 스캔 작업, 결과, 조회 필터
//!
//! 저장소, 디스패처, API가 공유하는 데이터 구조를 정의합니다.
//! [`Job`]의 대상(target), 템플릿 선택자, 옵션은 생성 시 한 번만 기록되며
//! 상태 갱신은 항상 [`StatusUpdate`]를 통해서만 이루어집니다.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// 작업 식별자
///
/// 생성 시 한 번 할당되는 불투명한 고유 ID입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// 새 무작위 ID를 생성합니다.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 내부 UUID를 반환합니다.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::Invalid {
                field: "id".to_owned(),
                reason: e.to_string(),
            })
    }
}

/// 작업 상태
///
/// `Pending`이 초기 상태이며 `Completed`, `Failed`, `Cancelled`는 종료 상태입니다.
/// 허용되는 전이는 [`lifecycle`](crate::lifecycle) 모듈을 참고하세요.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 디스패처가 가져가기를 기다리는 중
    Pending,
    /// 엔진 실행 중
    Running,
    /// 정상 완료
    Completed,
    /// 엔진 실패
    Failed,
    /// 취소됨
    Cancelled,
}

impl JobStatus {
    /// 모든 상태 (표시/검증용)
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// 소문자 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 종료 상태인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(ValidationError::Invalid {
                field: "status".to_owned(),
                reason: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// 심각도 레벨
///
/// `Ord` 구현으로 비교가 가능합니다 (`Unknown < Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 엔진이 심각도를 보고하지 않음
    #[default]
    Unknown,
    /// 정보성
    Info,
    /// 낮음
    Low,
    /// 중간
    Medium,
    /// 높음
    High,
    /// 치명적
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다. 알 수 없는 값은 `Unknown`이 됩니다.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "info" | "informational" => Self::Info,
            "low" => Self::Low,
            "medium" | "med" => Self::Medium,
            "high" => Self::High,
            "critical" | "crit" => Self::Critical,
            _ => Self::Unknown,
        }
    }

    /// 소문자 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 스캔 튜닝 옵션
///
/// 엔진에 그대로 전달되는 값입니다. 정수 필드의 `0`과 `None`은
/// "엔진 기본값 사용"을 의미하며, 실제 값은 엔진 어댑터가 결정합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// 한 작업 안에서의 병렬 요청 수
    pub concurrency: u32,
    /// 초당 최대 요청 수
    pub rate_limit: u32,
    /// 요청 타임아웃 (초)
    #[serde(alias = "timeout")]
    pub timeout_secs: u32,
    /// 일시적 실패 시 요청 재시도 횟수
    pub retries: u32,
    /// 헤드리스 브라우저 모드
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    /// 리다이렉트 추적 여부
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
}

/// 스캔 작업
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// 작업 ID
    pub id: JobId,
    /// 스캔 대상 (URL 또는 호스트)
    pub target: String,
    /// 실행할 템플릿 ID
    pub template_ids: Vec<String>,
    /// 실행할 템플릿 태그
    pub tags: Vec<String>,
    /// 엔진 옵션
    pub options: ScanOptions,
    /// 현재 상태
    pub status: JobStatus,
    /// 실패 사유 (`Failed`일 때만 존재)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 생성 시각
    pub created_at: SystemTime,
    /// 마지막 상태 변경 시각
    pub updated_at: SystemTime,
    /// 실행 시작 시각 (`Pending`이 아니면 존재)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<SystemTime>,
    /// 종료 시각 (종료 상태일 때만 존재)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<SystemTime>,
}

impl Job {
    /// `Pending` 상태의 새 작업을 만듭니다.
    pub fn new(
        target: impl Into<String>,
        template_ids: Vec<String>,
        tags: Vec<String>,
        options: ScanOptions,
        now: SystemTime,
    ) -> Self {
        Self {
            id: JobId::generate(),
            target: target.into(),
            template_ids,
            tags,
            options,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// 필터 조건을 모두 만족하는지 확인합니다.
    pub fn matches(&self, filter: &JobFilter) -> bool {
        if !filter.statuses.is_empty() && !filter.statuses.contains(&self.status) {
            return false;
        }
        if let Some(ref target) = filter.target
            && &self.target != target
        {
            return false;
        }
        if let Some(ref template) = filter.template
            && !self.template_ids.iter().chain(&self.tags).any(|t| t == template)
        {
            return false;
        }
        true
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} [{}] target={}", self.id, self.status, self.target)
    }
}

/// 상태 갱신 요청
///
/// 저장소의 유일한 변경 연산입니다. 상태, 에러, 타임스탬프만 담고 있어
/// 대상과 옵션은 구조적으로 변경할 수 없습니다.
/// `expected`는 저장된 직전 상태이며, 저장소는 이 값이 일치할 때만 갱신합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// 대상 작업
    pub id: JobId,
    /// 저장소에 기록되어 있어야 하는 직전 상태
    pub expected: JobStatus,
    /// 새 상태
    pub status: JobStatus,
    /// 실패 사유
    pub error: Option<String>,
    /// 갱신 시각
    pub updated_at: SystemTime,
    /// 시작 시각
    pub started_at: Option<SystemTime>,
    /// 종료 시각
    pub completed_at: Option<SystemTime>,
}

impl StatusUpdate {
    /// 갱신 내용을 작업에 반영합니다 (저장소 구현용).
    pub fn apply_to(&self, job: &mut Job) {
        job.status = self.status;
        job.error = self.error.clone();
        job.updated_at = self.updated_at;
        job.started_at = self.started_at;
        job.completed_at = self.completed_at;
    }
}

/// 작업 목록 조회 필터
///
/// 모든 조건은 AND로 결합되며, 비어 있는 조건은 제약이 없음을 뜻합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// 허용 상태 집합 (비어 있으면 전체)
    pub statuses: Vec<JobStatus>,
    /// 대상 정확히 일치
    pub target: Option<String>,
    /// 템플릿 ID 또는 태그 포함
    pub template: Option<String>,
    /// 최대 반환 개수 (정렬 후 앞에서부터)
    pub limit: Option<usize>,
}

impl JobFilter {
    /// 특정 상태만 조회하는 필터를 만듭니다.
    pub fn status(status: JobStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    /// 상태 조건을 추가합니다.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// 대상 조건을 설정합니다.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// 템플릿 조건을 설정합니다.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// 반환 개수 상한을 설정합니다.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 스캔 결과 (엔진 매치 하나)
///
/// 부모 작업이 단독으로 소유하며, 저장된 뒤에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// 작업 내 고유 ID (엔진 제공 ID 또는 `매처명:순번`)
    pub id: String,
    /// 부모 작업 ID
    pub job_id: JobId,
    /// 작업 내 방출 순서 (0부터)
    pub sequence: u64,
    /// 템플릿 ID
    pub template_id: String,
    /// 템플릿 이름
    pub template_name: String,
    /// 심각도
    pub severity: Severity,
    /// 매치된 호스트
    pub host: String,
    /// 매처 이름
    pub matcher_name: String,
    /// 매치 시각
    pub matched_at: SystemTime,
    /// 추출된 값
    #[serde(default)]
    pub extracted_results: Vec<String>,
    /// 원본 요청
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    /// 원본 응답
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// 자유 형식 메타데이터
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {} (matcher: {})",
            self.severity, self.template_id, self.host, self.matcher_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            "http://x",
            vec!["t1".to_owned()],
            vec!["cve".to_owned()],
            ScanOptions::default(),
            SystemTime::now(),
        )
    }

    #[test]
    fn new_job_is_pending_without_start() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn job_id_parse_roundtrip() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<JobId>().unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { .. }));
    }

    #[test]
    fn status_parse_accepts_both_spellings() {
        assert_eq!("Cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert_eq!("canceled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn severity_loose_parse_and_order() {
        assert_eq!(Severity::from_str_loose("CRIT"), Severity::Critical);
        assert_eq!(Severity::from_str_loose("whatever"), Severity::Unknown);
        assert!(Severity::Info < Severity::Critical);
        assert!(Severity::Unknown < Severity::Info);
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(sample_job().matches(&JobFilter::default()));
    }

    #[test]
    fn filter_is_conjunctive() {
        let job = sample_job();
        let filter = JobFilter::status(JobStatus::Pending).with_target("http://x");
        assert!(job.matches(&filter));

        let filter = filter.with_template("t2");
        assert!(!job.matches(&filter));
    }

    #[test]
    fn template_filter_matches_ids_and_tags() {
        let job = sample_job();
        assert!(job.matches(&JobFilter::default().with_template("t1")));
        assert!(job.matches(&JobFilter::default().with_template("cve")));
        assert!(!job.matches(&JobFilter::default().with_template("xss")));
    }

    #[test]
    fn status_filter_with_multiple_states() {
        let job = sample_job();
        let filter = JobFilter::status(JobStatus::Running).with_status(JobStatus::Pending);
        assert!(job.matches(&filter));
        assert!(!job.matches(&JobFilter::status(JobStatus::Completed)));
    }

    #[test]
    fn options_accept_timeout_alias() {
        let opts: ScanOptions =
            serde_json::from_str(r#"{"concurrency": 5, "timeout": 12}"#).unwrap();
        assert_eq!(opts.concurrency, 5);
        assert_eq!(opts.timeout_secs, 12);
        assert_eq!(opts.rate_limit, 0);
        assert!(opts.headless.is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
