#![doc = include_str!("../README.md")]

pub mod memory;
pub mod sqlite;

use std::future::Future;

use vigil_core::error::StoreError;
use vigil_core::types::{Job, JobFilter, JobId, ScanResult, StatusUpdate};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// 스캔 작업과 결과의 저장 계약
///
/// 디스패처와 제출 서비스는 이 trait으로만 저장소에 접근합니다.
/// 테스트에서는 메모리 저장소나 장애 주입 래퍼로 교체할 수 있습니다.
///
/// # 일관성
///
/// - 기존 작업의 변경은 `update_status`뿐입니다. 호출자가 마지막으로 본
///   상태를 함께 전달하며, 저장된 상태가 다르면 [`StoreError::Conflict`]로 거부됩니다.
/// - 결과는 추가 순서대로 보관되며 부모 작업이 `Running`일 때만 추가할 수 있습니다.
/// - 작업을 삭제하면 결과도 함께 삭제됩니다.
pub trait JobStore: Send + Sync + 'static {
    /// 로그와 헬스 출력에 쓰는 백엔드 이름
    fn name(&self) -> &str;

    /// 새 작업을 저장합니다.
    ///
    /// # Errors
    ///
    /// - 같은 ID의 작업이 있으면 `StoreError::AlreadyExists`
    fn create_job(&self, job: &Job) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// ID로 작업을 조회합니다.
    ///
    /// # Errors
    ///
    /// - 작업이 없으면 `StoreError::NotFound`
    fn get_job(&self, id: JobId) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// `filter`의 모든 조건을 만족하는 작업을 오래된 순서로 반환합니다.
    ///
    /// `filter.limit`이 있으면 정렬 후 앞에서부터 그 개수까지만 반환합니다.
    fn list_jobs(
        &self,
        filter: &JobFilter,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// 상태 전이를 적용하고 저장된 작업을 반환합니다.
    ///
    /// # Errors
    ///
    /// - 작업이 없으면 `StoreError::NotFound`
    /// - 저장된 상태가 `update.expected`가 아니면 `StoreError::Conflict`
    fn update_status(
        &self,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// 작업과 모든 결과를 삭제합니다.
    ///
    /// # Errors
    ///
    /// - 작업이 없으면 `StoreError::NotFound`
    fn delete_job(&self, id: JobId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 부모 작업에 결과 하나를 추가합니다.
    ///
    /// # Errors
    ///
    /// - 부모 작업이 없으면 `StoreError::NotFound`
    /// - 부모 작업이 `Running`이 아니면 `StoreError::Conflict`
    /// - 같은 작업에 이미 있는 결과 ID면 `StoreError::DuplicateResult`
    fn append_result(
        &self,
        result: &ScanResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 작업의 결과를 추가 순서대로 반환합니다.
    ///
    /// # Errors
    ///
    /// - 작업이 없으면 `StoreError::NotFound`
    fn list_results(
        &self,
        job_id: JobId,
    ) -> impl Future<Output = Result<Vec<ScanResult>, StoreError>> + Send;

    /// 백엔드에 접근할 수 있는지 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// 모든 백엔드의 목록 순서: `created_at`, 같으면 ID
pub(crate) fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
