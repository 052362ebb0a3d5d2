//! SQLite 저장소
//!
//! 연결 하나를 `std::sync::Mutex`로 감싸고, 모든 쿼리는 `spawn_blocking`에서 실행합니다.
//! 선택자, 옵션, 추출값, 메타데이터는 JSON 텍스트로, 시각은 유닉스 나노초로 저장합니다.
//!
//! # 스키마
//! ```text
//! jobs(id PK, target, template_ids, tags, options, status, error,
//!      created_at, updated_at, started_at, completed_at)
//! job_results(job_id FK → jobs ON DELETE CASCADE, result_id, sequence, ...,
//!             PRIMARY KEY (job_id, result_id))
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};
use vigil_core::error::StoreError;
use vigil_core::types::{
    Job, JobFilter, JobId, JobStatus, ScanOptions, ScanResult, Severity, StatusUpdate,
};

use crate::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    target        TEXT NOT NULL,
    template_ids  TEXT NOT NULL,
    tags          TEXT NOT NULL,
    options       TEXT NOT NULL,
    status        TEXT NOT NULL,
    error         TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    started_at    INTEGER,
    completed_at  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at, id);

CREATE TABLE IF NOT EXISTS job_results (
    job_id            TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    result_id         TEXT NOT NULL,
    sequence          INTEGER NOT NULL,
    template_id       TEXT NOT NULL,
    template_name     TEXT NOT NULL,
    severity          TEXT NOT NULL,
    host              TEXT NOT NULL,
    matcher_name      TEXT NOT NULL,
    matched_at        INTEGER NOT NULL,
    extracted_results TEXT NOT NULL,
    request           TEXT,
    response          TEXT,
    metadata          TEXT NOT NULL,
    PRIMARY KEY (job_id, result_id)
);
"#;

const JOB_COLUMNS: &str = "id, target, template_ids, tags, options, status, error, \
                           created_at, updated_at, started_at, completed_at";

const RESULT_COLUMNS: &str = "result_id, job_id, sequence, template_id, template_name, severity, \
                              host, matcher_name, matched_at, extracted_results, request, \
                              response, metadata";

/// SQLite 파일 기반 작업 저장소
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// 데이터베이스 파일을 열고 스키마를 준비합니다. 상위 디렉토리가 없으면 만듭니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(backend)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(backend)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "sqlite job store opened");
        Ok(store)
    }

    /// 메모리 상의 SQLite 데이터베이스를 엽니다 (테스트용).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_owned()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {e}")))?
    }
}

impl JobStore for SqliteJobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let job = job.clone();
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    &format!(
                        "INSERT INTO jobs ({JOB_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ),
                    params![
                        job.id.to_string(),
                        job.target,
                        to_json(&job.template_ids)?,
                        to_json(&job.tags)?,
                        to_json(&job.options)?,
                        job.status.as_str(),
                        job.error,
                        to_nanos(job.created_at),
                        to_nanos(job.updated_at),
                        job.started_at.map(to_nanos),
                        job.completed_at.map(to_nanos),
                    ],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        StoreError::AlreadyExists(job.id)
                    } else {
                        backend(e)
                    }
                })?;
            debug!(job_id = %job.id, inserted, "job row inserted");
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.with_conn(move |conn| fetch_job(conn, id)?.ok_or(StoreError::NotFound(id)))
            .await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if !filter.statuses.is_empty() {
                let placeholders = vec!["?"; filter.statuses.len()].join(", ");
                clauses.push(format!("status IN ({placeholders})"));
                values.extend(filter.statuses.iter().map(|s| s.as_str().to_owned()));
            }
            if let Some(target) = filter.target {
                clauses.push("target = ?".to_owned());
                values.push(target);
            }
            if let Some(template) = filter.template {
                clauses.push(
                    "(EXISTS (SELECT 1 FROM json_each(jobs.template_ids) WHERE value = ?) \
                     OR EXISTS (SELECT 1 FROM json_each(jobs.tags) WHERE value = ?))"
                        .to_owned(),
                );
                values.push(template.clone());
                values.push(template);
            }

            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            let limit_clause = match filter.limit {
                Some(limit) => format!(" LIMIT {limit}"),
                None => String::new(),
            };
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs{where_clause} ORDER BY created_at, id{limit_clause}"
            );

            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), read_job_row)
                .map_err(backend)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(decode_job(row.map_err(backend)?)?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<Job, StoreError> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let id = update.id.to_string();

            let current: Option<String> = tx
                .query_row("SELECT status FROM jobs WHERE id = ?1", [&id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(backend)?;
            let Some(current) = current else {
                return Err(StoreError::NotFound(update.id));
            };
            let actual = parse_status(&current)?;
            if actual != update.expected {
                return Err(StoreError::Conflict {
                    id: update.id,
                    expected: update.expected,
                    actual,
                });
            }

            let changed = tx
                .execute(
                    "UPDATE jobs \
                     SET status = ?2, error = ?3, updated_at = ?4, started_at = ?5, completed_at = ?6 \
                     WHERE id = ?1 AND status = ?7",
                    params![
                        id,
                        update.status.as_str(),
                        update.error,
                        to_nanos(update.updated_at),
                        update.started_at.map(to_nanos),
                        update.completed_at.map(to_nanos),
                        update.expected.as_str(),
                    ],
                )
                .map_err(backend)?;
            if changed != 1 {
                return Err(StoreError::Backend(format!(
                    "status update for job {} changed {changed} rows",
                    update.id
                )));
            }

            let job = fetch_job(&tx, update.id)?.ok_or(StoreError::NotFound(update.id))?;
            tx.commit().map_err(backend)?;
            Ok(job)
        })
        .await
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM jobs WHERE id = ?1", [id.to_string()])
                .map_err(backend)?;
            if deleted == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn append_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let result = result.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let job_id = result.job_id.to_string();

            let status: Option<String> = tx
                .query_row("SELECT status FROM jobs WHERE id = ?1", [&job_id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(backend)?;
            let Some(status) = status else {
                return Err(StoreError::NotFound(result.job_id));
            };
            let actual = parse_status(&status)?;
            if actual != JobStatus::Running {
                return Err(StoreError::Conflict {
                    id: result.job_id,
                    expected: JobStatus::Running,
                    actual,
                });
            }

            tx.execute(
                &format!(
                    "INSERT INTO job_results ({RESULT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    result.id,
                    job_id,
                    i64::try_from(result.sequence).unwrap_or(i64::MAX),
                    result.template_id,
                    result.template_name,
                    result.severity.as_str(),
                    result.host,
                    result.matcher_name,
                    to_nanos(result.matched_at),
                    to_json(&result.extracted_results)?,
                    result.request,
                    result.response,
                    to_json(&result.metadata)?,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::DuplicateResult {
                        job_id: result.job_id,
                        result_id: result.id.clone(),
                    }
                } else {
                    backend(e)
                }
            })?;
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<ScanResult>, StoreError> {
        self.with_conn(move |conn| {
            let id = job_id.to_string();
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM jobs WHERE id = ?1", [&id], |row| row.get(0))
                .optional()
                .map_err(backend)?;
            if exists.is_none() {
                return Err(StoreError::NotFound(job_id));
            }

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RESULT_COLUMNS} FROM job_results WHERE job_id = ?1 ORDER BY rowid"
                ))
                .map_err(backend)?;
            let rows = stmt.query_map([&id], read_result_row).map_err(backend)?;
            let mut results = Vec::new();
            for row in rows {
                results.push(decode_result(row.map_err(backend)?)?);
            }
            Ok(results)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(backend)
        })
        .await
    }
}

// --- 행 변환 ---

struct JobRow {
    id: String,
    target: String,
    template_ids: String,
    tags: String,
    options: String,
    status: String,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        target: row.get(1)?,
        template_ids: row.get(2)?,
        tags: row.get(3)?,
        options: row.get(4)?,
        status: row.get(5)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

fn decode_job(row: JobRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row
            .id
            .parse()
            .map_err(|e| StoreError::Serialization(format!("job id '{}': {e}", row.id)))?,
        target: row.target,
        template_ids: from_json(&row.template_ids)?,
        tags: from_json(&row.tags)?,
        options: from_json::<ScanOptions>(&row.options)?,
        status: parse_status(&row.status)?,
        error: row.error,
        created_at: from_nanos(row.created_at),
        updated_at: from_nanos(row.updated_at),
        started_at: row.started_at.map(from_nanos),
        completed_at: row.completed_at.map(from_nanos),
    })
}

fn fetch_job(conn: &Connection, id: JobId) -> Result<Option<Job>, StoreError> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        [id.to_string()],
        read_job_row,
    )
    .optional()
    .map_err(backend)?
    .map(decode_job)
    .transpose()
}

struct ResultRow {
    id: String,
    job_id: String,
    sequence: i64,
    template_id: String,
    template_name: String,
    severity: String,
    host: String,
    matcher_name: String,
    matched_at: i64,
    extracted_results: String,
    request: Option<String>,
    response: Option<String>,
    metadata: String,
}

fn read_result_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        sequence: row.get(2)?,
        template_id: row.get(3)?,
        template_name: row.get(4)?,
        severity: row.get(5)?,
        host: row.get(6)?,
        matcher_name: row.get(7)?,
        matched_at: row.get(8)?,
        extracted_results: row.get(9)?,
        request: row.get(10)?,
        response: row.get(11)?,
        metadata: row.get(12)?,
    })
}

fn decode_result(row: ResultRow) -> Result<ScanResult, StoreError> {
    Ok(ScanResult {
        id: row.id,
        job_id: row
            .job_id
            .parse()
            .map_err(|e| StoreError::Serialization(format!("job id '{}': {e}", row.job_id)))?,
        sequence: u64::try_from(row.sequence).unwrap_or_default(),
        template_id: row.template_id,
        template_name: row.template_name,
        severity: Severity::from_str_loose(&row.severity),
        host: row.host,
        matcher_name: row.matcher_name,
        matched_at: from_nanos(row.matched_at),
        extracted_results: from_json(&row.extracted_results)?,
        request: row.request,
        response: row.response,
        metadata: from_json(&row.metadata)?,
    })
}

// --- 헬퍼 ---

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn parse_status(s: &str) -> Result<JobStatus, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Serialization(format!("stored status '{s}': {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}

fn from_nanos(n: i64) -> SystemTime {
    if n >= 0 {
        UNIX_EPOCH + Duration::from_nanos(n.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_nanos(n.unsigned_abs())
    }
}
