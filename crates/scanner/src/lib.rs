#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: 도메인 에러 타입 (`ScannerError`)
//! - [`config`]: 스캐너 설정 (`ScannerConfig`, 빌더, `EngineDefaults`)
//! - [`validate`]: 제출 입력 검증
//! - [`engine`]: 엔진 capability trait (`ScanEngine`, `OptionSupport`, `ResolvedOptions`)
//! - [`adapter`]: 취소 가능한 작업 실행 (`EngineAdapter`, `ScanRun`, `RunOutcome`)
//! - [`registry`]: 취소 핸들 레지스트리 (`CancellationRegistry`)
//! - [`dispatcher`]: 폴링 디스패처 (`Dispatcher`, `ScannerBuilder`, `Pipeline` impl)
//! - [`service`]: 제출/조회 API (`ScanService`)
//! - [`process`]: 외부 스캐너 프로세스 엔진 (`ProcessEngine`)
//!
//! # Architecture
//!
//! ```text
//! ScanService ──create──▶ JobStore ◀──list/update/append── Dispatcher
//!      │                                                      │
//!      └──cancel──▶ CancellationRegistry ◀──register/release──┤
//!                                                             ▼
//!                                             EngineAdapter ──▶ ScanEngine
//! ```

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod process;
pub mod registry;
pub mod service;
pub mod validate;

// --- Public API Re-exports ---

// Dispatcher
pub use dispatcher::{Dispatcher, ORPHAN_ERROR, ScannerBuilder, TickSummary};

// Configuration
pub use config::{EngineDefaults, ScannerConfig, ScannerConfigBuilder};

// Error
pub use error::ScannerError;

// Engine
pub use adapter::{EngineAdapter, RunOutcome, ScanRun};
pub use engine::{EngineRequest, MatchEvent, OptionSupport, ResolvedOptions, ScanEngine};
pub use process::{ProcessEngine, ProcessEngineConfig};

// Cancellation
pub use registry::CancellationRegistry;

// Submission / query
pub use service::{CancelOutcome, ScanService, SubmitRequest};
