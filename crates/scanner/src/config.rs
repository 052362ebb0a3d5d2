//! 스캐너 설정
//!
//! [`ScannerConfig`]는 core의 [`DispatcherConfig`](vigil_core::config::DispatcherConfig)와
//! [`EngineConfig`](vigil_core::config::EngineConfig)에서 파생되며,
//! 결과 채널 용량과 종료 drain 시간 같은 스캐너 고유 설정을 추가합니다.
//!
//! # 사용 예시
//!
//! ```
//! use vigil_scanner::ScannerConfigBuilder;
//!
//! let config = ScannerConfigBuilder::new()
//!     .poll_interval_secs(5)
//!     .max_concurrent_scans(2)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_concurrent_scans, 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::config::{
    MAX_CONCURRENT_SCANS, MAX_POLL_INTERVAL_SECS, MAX_SHUTDOWN_GRACE_SECS, VigilConfig,
};

use crate::error::ScannerError;

/// 작업 옵션이 0(미지정)일 때 쓰는 엔진 기본값
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDefaults {
    /// 병렬 요청 수
    pub concurrency: u32,
    /// 초당 요청 수
    pub rate_limit: u32,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u32,
    /// 재시도 횟수
    pub retries: u32,
    /// 헤드리스 모드
    pub headless: bool,
    /// 리다이렉트 추적
    pub follow_redirects: bool,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            concurrency: 10,
            rate_limit: 100,
            timeout_secs: 30,
            retries: 3,
            headless: false,
            follow_redirects: true,
        }
    }
}

/// 스캐너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// 디스패치 주기 (초)
    pub poll_interval_secs: u64,
    /// 동시 실행 작업 수 상한
    pub max_concurrent_scans: usize,
    /// 종료 시 진행 중 작업을 기다리는 시간 (초)
    pub shutdown_grace_secs: u64,
    /// 시작 시 고아 `Running` 작업 정리 여부
    pub recover_orphans: bool,
    /// 엔진 기본값
    pub engine_defaults: EngineDefaults,

    // --- 모듈 고유 확장 ---
    /// 엔진 → 어댑터 매치 이벤트 채널 용량
    pub result_channel_capacity: usize,
    /// 유예 시간 후 강제 취소한 작업을 기다리는 시간 (초)
    pub drain_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            max_concurrent_scans: 4,
            shutdown_grace_secs: 10,
            recover_orphans: true,
            engine_defaults: EngineDefaults::default(),
            result_channel_capacity: 64,
            drain_timeout_secs: 5,
        }
    }
}

const MAX_RESULT_CHANNEL_CAPACITY: usize = 65_536;
const MAX_DRAIN_TIMEOUT_SECS: u64 = 300;

impl ScannerConfig {
    /// core 설정에서 스캐너 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값을 사용합니다.
    pub fn from_core(core: &VigilConfig) -> Self {
        let engine = &core.engine;
        Self {
            poll_interval_secs: core.dispatcher.poll_interval_secs,
            max_concurrent_scans: core.dispatcher.max_concurrent_scans,
            shutdown_grace_secs: core.dispatcher.shutdown_grace_secs,
            recover_orphans: core.dispatcher.recover_orphans,
            engine_defaults: EngineDefaults {
                concurrency: engine.concurrency,
                rate_limit: engine.rate_limit,
                timeout_secs: engine.timeout_secs,
                retries: engine.retries,
                headless: engine.headless,
                follow_redirects: engine.follow_redirects,
            },
            ..Self::default()
        }
    }

    /// 디스패치 주기
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// 종료 유예 시간
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// 강제 취소 후 drain 시간
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// 설정 값의 유효성을 검증합니다.
    ///
    /// # 검증 규칙
    ///
    /// - `poll_interval_secs`: 1-3600
    /// - `max_concurrent_scans`: 1-256
    /// - `shutdown_grace_secs`: 0-600
    /// - `result_channel_capacity`: 1-65536
    /// - `drain_timeout_secs`: 0-300
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.poll_interval_secs == 0 || self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(config_err(
                "poll_interval_secs",
                format!("must be 1-{MAX_POLL_INTERVAL_SECS}"),
            ));
        }
        if self.max_concurrent_scans == 0 || self.max_concurrent_scans > MAX_CONCURRENT_SCANS {
            return Err(config_err(
                "max_concurrent_scans",
                format!("must be 1-{MAX_CONCURRENT_SCANS}"),
            ));
        }
        if self.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
            return Err(config_err(
                "shutdown_grace_secs",
                format!("must be 0-{MAX_SHUTDOWN_GRACE_SECS}"),
            ));
        }
        if self.result_channel_capacity == 0
            || self.result_channel_capacity > MAX_RESULT_CHANNEL_CAPACITY
        {
            return Err(config_err(
                "result_channel_capacity",
                format!("must be 1-{MAX_RESULT_CHANNEL_CAPACITY}"),
            ));
        }
        if self.drain_timeout_secs > MAX_DRAIN_TIMEOUT_SECS {
            return Err(config_err(
                "drain_timeout_secs",
                format!("must be 0-{MAX_DRAIN_TIMEOUT_SECS}"),
            ));
        }
        Ok(())
    }
}

fn config_err(field: &str, reason: String) -> ScannerError {
    ScannerError::Config {
        field: field.to_owned(),
        reason,
    }
}

/// [`ScannerConfig`] 빌더
///
/// 빌드 시 유효성 검증을 수행합니다.
#[derive(Default)]
pub struct ScannerConfigBuilder {
    config: ScannerConfig,
}

impl ScannerConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 디스패치 주기(초)를 설정합니다.
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    /// 동시 실행 작업 수 상한을 설정합니다.
    pub fn max_concurrent_scans(mut self, max: usize) -> Self {
        self.config.max_concurrent_scans = max;
        self
    }

    /// 종료 유예 시간(초)을 설정합니다.
    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    /// 고아 작업 정리 여부를 설정합니다.
    pub fn recover_orphans(mut self, recover: bool) -> Self {
        self.config.recover_orphans = recover;
        self
    }

    /// 엔진 기본값을 설정합니다.
    pub fn engine_defaults(mut self, defaults: EngineDefaults) -> Self {
        self.config.engine_defaults = defaults;
        self
    }

    /// 매치 이벤트 채널 용량을 설정합니다.
    pub fn result_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.result_channel_capacity = capacity;
        self
    }

    /// 강제 취소 후 drain 시간(초)을 설정합니다.
    pub fn drain_timeout_secs(mut self, secs: u64) -> Self {
        self.config.drain_timeout_secs = secs;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    ///
    /// # Errors
    ///
    /// 유효성 검증 실패 시 `ScannerError::Config` 반환
    pub fn build(self) -> Result<ScannerConfig, ScannerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
