//! 설정 관리: vigil.toml 파싱 및 런타임 설정
//!
//! [`VigilConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`VIGIL_DISPATCHER_POLL_INTERVAL_SECS=5` 형식)
//! 3. 설정 파일 (`vigil.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), vigil_core::error::VigilError> {
//! use vigil_core::config::VigilConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = VigilConfig::load("vigil.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = VigilConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VigilError};

/// 디스패치 주기 상한 (초)
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
/// 동시 실행 작업 수 상한
pub const MAX_CONCURRENT_SCANS: usize = 256;
/// 종료 유예 시간 상한 (초)
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 600;

/// Vigil 통합 설정
///
/// `vigil.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// HTTP API 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// 작업 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 디스패처 설정
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// 스캔 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl VigilConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, VigilError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, VigilError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VigilError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                VigilError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, VigilError> {
        toml::from_str(toml_str).map_err(|e| {
            VigilError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `VIGIL_{SECTION}_{FIELD}`
    /// 예: `VIGIL_STORE_BACKEND=sqlite`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "VIGIL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "VIGIL_GENERAL_LOG_FORMAT");

        // API
        override_bool(&mut self.api.enabled, "VIGIL_API_ENABLED");
        override_string(&mut self.api.bind, "VIGIL_API_BIND");

        // Store
        override_string(&mut self.store.backend, "VIGIL_STORE_BACKEND");
        override_string(&mut self.store.sqlite_path, "VIGIL_STORE_SQLITE_PATH");

        // Dispatcher
        override_u64(
            &mut self.dispatcher.poll_interval_secs,
            "VIGIL_DISPATCHER_POLL_INTERVAL_SECS",
        );
        override_usize(
            &mut self.dispatcher.max_concurrent_scans,
            "VIGIL_DISPATCHER_MAX_CONCURRENT_SCANS",
        );
        override_u64(
            &mut self.dispatcher.shutdown_grace_secs,
            "VIGIL_DISPATCHER_SHUTDOWN_GRACE_SECS",
        );
        override_bool(
            &mut self.dispatcher.recover_orphans,
            "VIGIL_DISPATCHER_RECOVER_ORPHANS",
        );

        // Engine
        override_string(&mut self.engine.binary, "VIGIL_ENGINE_BINARY");
        override_string(&mut self.engine.templates_dir, "VIGIL_ENGINE_TEMPLATES_DIR");
        override_u32(&mut self.engine.concurrency, "VIGIL_ENGINE_CONCURRENCY");
        override_u32(&mut self.engine.rate_limit, "VIGIL_ENGINE_RATE_LIMIT");
        override_u32(&mut self.engine.timeout_secs, "VIGIL_ENGINE_TIMEOUT_SECS");
        override_u32(&mut self.engine.retries, "VIGIL_ENGINE_RETRIES");
        override_bool(&mut self.engine.headless, "VIGIL_ENGINE_HEADLESS");
        override_bool(
            &mut self.engine.follow_redirects,
            "VIGIL_ENGINE_FOLLOW_REDIRECTS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "VIGIL_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "VIGIL_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "VIGIL_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VigilError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.api.enabled && self.api.bind.parse::<SocketAddr>().is_err() {
            return Err(invalid(
                "api.bind",
                format!("'{}' is not a valid socket address", self.api.bind),
            ));
        }

        // store backend 검증
        let valid_backends = ["memory", "sqlite"];
        if !valid_backends.contains(&self.store.backend.as_str()) {
            return Err(invalid(
                "store.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }
        if self.store.backend == "sqlite" && self.store.sqlite_path.trim().is_empty() {
            return Err(invalid(
                "store.sqlite_path",
                "must not be empty when backend is sqlite".to_owned(),
            ));
        }

        // dispatcher 범위 검증
        let interval = self.dispatcher.poll_interval_secs;
        if interval == 0 || interval > MAX_POLL_INTERVAL_SECS {
            return Err(invalid(
                "dispatcher.poll_interval_secs",
                format!("must be between 1 and {MAX_POLL_INTERVAL_SECS}, got {interval}"),
            ));
        }
        let slots = self.dispatcher.max_concurrent_scans;
        if slots == 0 || slots > MAX_CONCURRENT_SCANS {
            return Err(invalid(
                "dispatcher.max_concurrent_scans",
                format!("must be between 1 and {MAX_CONCURRENT_SCANS}, got {slots}"),
            ));
        }
        if self.dispatcher.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
            return Err(invalid(
                "dispatcher.shutdown_grace_secs",
                format!(
                    "must be at most {MAX_SHUTDOWN_GRACE_SECS}, got {}",
                    self.dispatcher.shutdown_grace_secs
                ),
            ));
        }

        if self.engine.binary.trim().is_empty() {
            return Err(invalid("engine.binary", "must not be empty".to_owned()));
        }

        if self.metrics.enabled && self.metrics.listen_addr.parse::<IpAddr>().is_err() {
            return Err(invalid(
                "metrics.listen_addr",
                format!("'{}' is not a valid IP address", self.metrics.listen_addr),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> VigilError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// HTTP API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소 (인증이 없으므로 기본은 루프백)
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:3742".to_owned(),
        }
    }
}

/// 작업 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 백엔드 (memory, sqlite)
    pub backend: String,
    /// SQLite 데이터베이스 파일 경로
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_owned(),
            sqlite_path: "/var/lib/vigil/vigil.db".to_owned(),
        }
    }
}

/// 디스패처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 디스패치 주기 (초)
    pub poll_interval_secs: u64,
    /// 동시에 실행할 수 있는 최대 작업 수
    pub max_concurrent_scans: usize,
    /// 종료 시 진행 중 작업을 기다리는 시간 (초)
    pub shutdown_grace_secs: u64,
    /// 시작 시 `Running`으로 남은 작업을 `Failed`로 정리할지 여부
    pub recover_orphans: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            max_concurrent_scans: 4,
            shutdown_grace_secs: 10,
            recover_orphans: true,
        }
    }
}

/// 스캔 엔진 설정
///
/// 숫자 필드는 작업 옵션이 0일 때 사용하는 기본값입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 외부 스캐너 실행 파일
    pub binary: String,
    /// 템플릿 디렉토리
    pub templates_dir: String,
    /// 기본 병렬 요청 수
    pub concurrency: u32,
    /// 기본 초당 요청 수
    pub rate_limit: u32,
    /// 기본 요청 타임아웃 (초)
    pub timeout_secs: u32,
    /// 기본 재시도 횟수
    pub retries: u32,
    /// 기본 헤드리스 모드
    pub headless: bool,
    /// 기본 리다이렉트 추적
    pub follow_redirects: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "nuclei".to_owned(),
            templates_dir: "./templates".to_owned(),
            concurrency: 10,
            rate_limit: 100,
            timeout_secs: 30,
            retries: 3,
            headless: false,
            follow_redirects: true,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus exporter 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse {type_name} from env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}
