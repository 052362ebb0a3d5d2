//! 외부 스캐너 프로세스 엔진
//!
//! nuclei 호환 바이너리를 셸 없이 직접 실행하고 stdout의 JSONL 출력을
//! 한 줄씩 [`MatchEvent`]로 변환합니다.
//!
//! ```text
//! <binary> -target <t> [-id a,b] [-tags x,y] -c N -rl N -timeout N -retries N
//!          [-headless] [-fr] -jsonl -silent [-t <templates_dir>]
//! ```
//!
//! 취소되면 자식 프로세스를 종료시키고, 0이 아닌 종료 코드는 stderr 마지막 줄들과 함께
//! 실행 실패로 보고합니다.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::config::EngineConfig;
use vigil_core::error::EngineError;
use vigil_core::types::Severity;

use crate::engine::{EngineRequest, MatchEvent, OptionSupport, ScanEngine};

/// 실패 메시지에 포함할 stderr 줄 수
const STDERR_TAIL_LINES: usize = 20;

/// 프로세스 엔진 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEngineConfig {
    /// 스캐너 실행 파일 (PATH 검색)
    pub binary: PathBuf,
    /// 템플릿 디렉토리 (비어 있으면 스캐너 기본값)
    pub templates_dir: Option<PathBuf>,
}

impl ProcessEngineConfig {
    /// core 엔진 설정에서 생성합니다.
    pub fn from_core(engine: &EngineConfig) -> Self {
        let templates_dir = if engine.templates_dir.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&engine.templates_dir))
        };
        Self {
            binary: PathBuf::from(&engine.binary),
            templates_dir,
        }
    }
}

/// 외부 스캐너 프로세스 엔진
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    config: ProcessEngineConfig,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self { config }
    }

    /// 요청을 명령행 인자로 변환합니다.
    pub fn args(&self, request: &EngineRequest) -> Vec<String> {
        let opts = &request.options;
        let mut args = vec!["-target".to_owned(), request.target.clone()];
        if !request.template_ids.is_empty() {
            args.push("-id".to_owned());
            args.push(request.template_ids.join(","));
        }
        if !request.tags.is_empty() {
            args.push("-tags".to_owned());
            args.push(request.tags.join(","));
        }
        args.extend([
            "-c".to_owned(),
            opts.concurrency.to_string(),
            "-rl".to_owned(),
            opts.rate_limit.to_string(),
            "-timeout".to_owned(),
            opts.timeout_secs.to_string(),
            "-retries".to_owned(),
            opts.retries.to_string(),
        ]);
        if opts.headless {
            args.push("-headless".to_owned());
        }
        if opts.follow_redirects {
            args.push("-fr".to_owned());
        }
        args.push("-jsonl".to_owned());
        args.push("-silent".to_owned());
        if let Some(ref dir) = self.config.templates_dir {
            args.push("-t".to_owned());
            args.push(dir.display().to_string());
        }
        args
    }
}

impl ScanEngine for ProcessEngine {
    fn name(&self) -> &str {
        "process"
    }

    fn capabilities(&self) -> OptionSupport {
        OptionSupport::ALL
    }

    async fn execute(
        &self,
        request: EngineRequest,
        matches: mpsc::Sender<MatchEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let job_id = request.job_id;
        let mut child = Command::new(&self.config.binary)
            .args(self.args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Launch(format!("{}: {e}", self.config.binary.display()))
            })?;
        debug!(job_id = %job_id, pid = ?child.id(), "scanner process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("stdout not captured".to_owned()))?;
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(job_id = %job_id, "cancelling scanner process");
                    if let Err(e) = child.start_kill() {
                        warn!(job_id = %job_id, error = %e, "failed to kill scanner process");
                    }
                    let _ = child.wait().await;
                    return Ok(());
                }
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_match(&line) {
                        Ok(event) => {
                            if matches.send(event).await.is_err() {
                                // 수신 측이 사라짐
                                let _ = child.start_kill();
                                let _ = child.wait().await;
                                return Ok(());
                            }
                        }
                        Err(e) => warn!(job_id = %job_id, error = %e, "skipping malformed scanner output line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = child.start_kill();
                    return Err(EngineError::Execution(format!("failed to read scanner output: {e}")));
                }
            }
        }

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(());
            }
            status = child.wait() => status
                .map_err(|e| EngineError::Execution(format!("failed to wait for scanner: {e}")))?,
        };
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if status.success() {
            debug!(job_id = %job_id, "scanner process exited cleanly");
            return Ok(());
        }
        let tail = stderr_tail
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let mut reason = format!("scanner exited with {status}");
        if !tail.is_empty() {
            reason.push_str(": ");
            reason.push_str(&tail);
        }
        Err(EngineError::Execution(reason))
    }
}

/// 스캐너 JSONL 출력 한 줄
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMatch {
    template_id: String,
    #[serde(default)]
    info: RawInfo,
    #[serde(default)]
    host: String,
    #[serde(default)]
    matcher_name: String,
    #[serde(default)]
    extracted_results: Vec<String>,
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    severity: String,
}

/// 출력 한 줄을 매치 이벤트로 변환합니다. 알 수 없는 필드는 메타데이터로 보존합니다.
fn parse_match(line: &str) -> Result<MatchEvent, EngineError> {
    let raw: RawMatch =
        serde_json::from_str(line).map_err(|e| EngineError::Protocol(e.to_string()))?;
    Ok(MatchEvent {
        id: None,
        template_name: if raw.info.name.is_empty() {
            raw.template_id.clone()
        } else {
            raw.info.name
        },
        template_id: raw.template_id,
        severity: Severity::from_str_loose(&raw.info.severity),
        host: raw.host,
        matcher_name: raw.matcher_name,
        matched_at: None,
        extracted_results: raw.extracted_results,
        request: raw.request,
        response: raw.response,
        metadata: raw.extra,
    })
}
