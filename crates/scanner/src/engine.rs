//! 스캔 엔진 추상화
//!
//! [`ScanEngine`] trait은 디스패처와 실제 스캐너를 분리합니다.
//! 운영 환경에서는 외부 바이너리를 구동하는 [`ProcessEngine`](crate::process::ProcessEngine)을,
//! 테스트에서는 스크립트 기반 메모리 엔진을 사용합니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_core::error::EngineError;
use vigil_core::types::{JobId, ScanOptions, Severity};

use crate::config::EngineDefaults;

/// 엔진이 지원하는 튜닝 옵션
///
/// 지원하지 않는 옵션은 조용히 버리지 않고 [`ResolvedOptions::ignored`]로 보고합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSupport {
    pub concurrency: bool,
    pub rate_limit: bool,
    pub timeout: bool,
    pub retries: bool,
    pub headless: bool,
    pub follow_redirects: bool,
}

impl OptionSupport {
    /// 모든 옵션 지원
    pub const ALL: Self = Self {
        concurrency: true,
        rate_limit: true,
        timeout: true,
        retries: true,
        headless: true,
        follow_redirects: true,
    };

    /// 모든 옵션 무시
    pub const NONE: Self = Self {
        concurrency: false,
        rate_limit: false,
        timeout: false,
        retries: false,
        headless: false,
        follow_redirects: false,
    };
}

/// 엔진 기본값이 채워진 작업 옵션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub concurrency: u32,
    pub rate_limit: u32,
    pub timeout_secs: u32,
    pub retries: u32,
    pub headless: bool,
    pub follow_redirects: bool,
    ignored: Vec<&'static str>,
}

impl ResolvedOptions {
    /// 작업 옵션에 엔진 기본값을 적용합니다.
    ///
    /// 0인 정수와 지정되지 않은 플래그는 기본값을 사용합니다.
    /// 명시적으로 지정했지만 엔진이 지원하지 않는 옵션은 무시 목록에 기록됩니다.
    pub fn resolve(options: &ScanOptions, defaults: &EngineDefaults, support: OptionSupport) -> Self {
        let mut ignored = Vec::new();
        let mut note = |name: &'static str, set: bool, supported: bool| {
            if set && !supported {
                ignored.push(name);
            }
        };
        note("concurrency", options.concurrency != 0, support.concurrency);
        note("rate_limit", options.rate_limit != 0, support.rate_limit);
        note("timeout", options.timeout_secs != 0, support.timeout);
        note("retries", options.retries != 0, support.retries);
        note("headless", options.headless.is_some(), support.headless);
        note(
            "follow_redirects",
            options.follow_redirects.is_some(),
            support.follow_redirects,
        );

        Self {
            concurrency: or_default(options.concurrency, defaults.concurrency),
            rate_limit: or_default(options.rate_limit, defaults.rate_limit),
            timeout_secs: or_default(options.timeout_secs, defaults.timeout_secs),
            retries: or_default(options.retries, defaults.retries),
            headless: options.headless.unwrap_or(defaults.headless),
            follow_redirects: options.follow_redirects.unwrap_or(defaults.follow_redirects),
            ignored,
        }
    }

    /// 작업에 지정되었지만 엔진이 따르지 않는 옵션
    pub fn ignored(&self) -> &[&'static str] {
        &self.ignored
    }
}

fn or_default(value: u32, default: u32) -> u32 {
    if value == 0 { default } else { value }
}

/// 엔진 호출 하나
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub job_id: JobId,
    pub target: String,
    pub template_ids: Vec<String>,
    pub tags: Vec<String>,
    pub options: ResolvedOptions,
}

/// 엔진이 보고한 원시 매치
///
/// 어댑터가 ID와 순번을 부여해 [`ScanResult`](vigil_core::types::ScanResult)로 변환합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchEvent {
    /// 엔진이 부여한 ID (있는 경우)
    pub id: Option<String>,
    pub template_id: String,
    pub template_name: String,
    pub severity: Severity,
    pub host: String,
    pub matcher_name: String,
    /// 엔진이 보고한 매치 시각 (없으면 수신 시각)
    pub matched_at: Option<SystemTime>,
    pub extracted_results: Vec<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// 템플릿 기반 취약점 스캐너 추상화
///
/// 엔진 하나를 동시에 실행되는 여러 작업이 공유하므로
/// 구현체는 `Send + Sync + 'static`이어야 합니다.
pub trait ScanEngine: Send + Sync + 'static {
    /// 로그용 엔진 이름
    fn name(&self) -> &str;

    /// 이 엔진이 지원하는 옵션
    fn capabilities(&self) -> OptionSupport;

    /// 스캔 하나를 실행하며 매치를 방출 순서대로 `matches`에 보냅니다.
    ///
    /// 스캔이 끝까지 실행되면 `Ok(())`를 반환합니다. `cancel`이 발화하면
    /// 엔진은 즉시 멈춰야 하며 이때의 반환값은 무시됩니다.
    /// `matches` 채널이 닫혔다면 소비자가 사라진 것이므로 엔진도 멈춰야 합니다.
    fn execute(
        &self,
        request: EngineRequest,
        matches: mpsc::Sender<MatchEvent>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}
