//! HTTP API for submitting and inspecting scan jobs.
//!
//! A thin layer over [`ScanService`]: request parsing, status codes and JSON
//! encoding only. All job semantics live in the scanner crate.
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | POST | `/api/v1/scans` | 201 |
//! | GET | `/api/v1/scans?status=&target=&template=` | 200 |
//! | GET | `/api/v1/scans/{id}` | 200 |
//! | DELETE | `/api/v1/scans/{id}` | 204 |
//! | POST | `/api/v1/scans/{id}/cancel` | 202 |
//! | GET | `/api/v1/scans/{id}/results` | 200 |
//! | GET | `/health` | 200 (503 when unhealthy) |
//!
//! Errors are returned as `{"error": "<message>"}`.

use std::fmt;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vigil_core::error::StoreError;
use vigil_core::types::{Job, JobFilter, JobId, JobStatus, ScanResult};
use vigil_scanner::{CancelOutcome, ScanService, ScannerError, SubmitRequest};

use crate::health::DaemonHealth;
use crate::store::Store;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    /// Submission/query service.
    pub service: ScanService<Store>,
    /// Latest aggregated health report, refreshed by the orchestrator.
    pub health: watch::Receiver<DaemonHealth>,
}

/// API error rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ScannerError> for ApiError {
    fn from(err: ScannerError) -> Self {
        match &err {
            ScannerError::Validation(_) => Self::bad_request(err.to_string()),
            ScannerError::Store(StoreError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            ScannerError::Store(StoreError::AlreadyExists(_)) => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            _ => {
                tracing::error!(error = %err, "scan api request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Query parameters for listing jobs.
///
/// `status` accepts a comma-separated set, e.g. `status=pending,running`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Allowed statuses.
    pub status: Option<String>,
    /// Exact target.
    pub target: Option<String>,
    /// Template id or tag the job must include.
    pub template: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<JobFilter> {
        let mut filter = JobFilter::default();
        if let Some(statuses) = self.status {
            for raw in statuses.split(',').filter(|s| !s.trim().is_empty()) {
                let status: JobStatus = raw
                    .parse()
                    .map_err(|e: vigil_core::error::ValidationError| {
                        ApiError::bad_request(e.to_string())
                    })?;
                filter = filter.with_status(status);
            }
        }
        if let Some(target) = self.target {
            filter = filter.with_target(target);
        }
        if let Some(template) = self.template {
            filter = filter.with_template(template);
        }
        Ok(filter)
    }
}

/// Body of an accepted cancellation.
#[derive(Debug, Serialize)]
struct CancelAccepted {
    job_id: JobId,
    cancel: &'static str,
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/scans", post(submit_scan).get(list_scans))
        .route("/api/v1/scans/{id}", get(get_scan).delete(delete_scan))
        .route("/api/v1/scans/{id}/cancel", post(cancel_scan))
        .route("/api/v1/scans/{id}/results", get(scan_results))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` is cancelled.
///
/// In-flight requests are allowed to finish before the future resolves.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(listen_addr = %addr, "scan api listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|e: vigil_core::error::ValidationError| ApiError::bad_request(e.to_string()))
}

async fn submit_scan(
    State(state): State<ApiState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let Json(request) = body?;
    let job = state.service.submit(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_scans(
    State(state): State<ApiState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    Ok(Json(state.service.list(&filter).await?))
}

async fn get_scan(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get(id).await?))
}

async fn delete_scan(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_scan(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelAccepted>)> {
    let id = parse_id(&id)?;
    match state.service.cancel(id).await? {
        CancelOutcome::Requested => Ok((
            StatusCode::ACCEPTED,
            Json(CancelAccepted {
                job_id: id,
                cancel: "requested",
            }),
        )),
        CancelOutcome::NotRunning(status) => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("job {id} is not running (status: {status})"),
        )),
        CancelOutcome::NoExecution => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("no running execution found for job {id}"),
        )),
    }
}

async fn scan_results(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ScanResult>>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.results(id).await?))
}

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<DaemonHealth>) {
    let report = state.health.borrow().clone();
    let code = if report.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}
