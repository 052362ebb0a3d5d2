//! JobStore 계약 테스트
//!
//! 같은 시나리오를 메모리 저장소와 SQLite 저장소에 모두 실행합니다.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use vigil_core::error::StoreError;
use vigil_core::lifecycle::JobEvent;
use vigil_core::types::{Job, JobFilter, JobStatus, ScanOptions, ScanResult, Severity};
use vigil_store::{JobStore, MemoryJobStore, SqliteJobStore};

fn job_at(target: &str, templates: &[&str], tags: &[&str], created: SystemTime) -> Job {
    Job::new(
        target,
        templates.iter().map(|s| (*s).to_owned()).collect(),
        tags.iter().map(|s| (*s).to_owned()).collect(),
        ScanOptions {
            concurrency: 5,
            ..ScanOptions::default()
        },
        created,
    )
}

fn result(job: &Job, seq: u64) -> ScanResult {
    let mut metadata = BTreeMap::new();
    metadata.insert("seq".to_owned(), serde_json::json!(seq));
    ScanResult {
        id: format!("status-matcher:{seq}"),
        job_id: job.id,
        sequence: seq,
        template_id: "t1".to_owned(),
        template_name: "Template One".to_owned(),
        severity: Severity::High,
        host: job.target.clone(),
        matcher_name: "status-matcher".to_owned(),
        matched_at: SystemTime::now(),
        extracted_results: vec![format!("value-{seq}")],
        request: Some("GET / HTTP/1.1".to_owned()),
        response: None,
        metadata,
    }
}

/// 작업을 만들고 Running으로 전환합니다.
async fn create_running<S: JobStore>(store: &S, target: &str) -> Job {
    let mut job = job_at(target, &["t1"], &[], SystemTime::now());
    store.create_job(&job).await.unwrap();
    let claim = job.apply(JobEvent::Claimed, SystemTime::now()).unwrap();
    store.update_status(&claim).await.unwrap()
}

fn sqlite_store(dir: &tempfile::TempDir) -> SqliteJobStore {
    SqliteJobStore::open(dir.path().join("vigil.db")).unwrap()
}

// =============================================================================
// 시나리오
// =============================================================================

async fn create_and_get_roundtrips<S: JobStore>(store: S) {
    let job = job_at("http://x", &["t1"], &["cve"], SystemTime::now());
    store.create_job(&job).await.unwrap();

    let fetched = store.get_job(job.id).await.unwrap();
    assert_eq!(fetched, job);
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.options.concurrency, 5);
}

async fn missing_job_is_not_found<S: JobStore>(store: S) {
    let job = job_at("http://x", &[], &[], SystemTime::now());
    assert!(store.get_job(job.id).await.unwrap_err().is_not_found());
    assert!(store.delete_job(job.id).await.unwrap_err().is_not_found());
    assert!(store.list_results(job.id).await.unwrap_err().is_not_found());
    assert!(
        store
            .append_result(&result(&job, 0))
            .await
            .unwrap_err()
            .is_not_found()
    );
}

async fn list_is_ordered_and_filtered<S: JobStore>(store: S) {
    let base = SystemTime::now();
    let a = job_at("http://a", &["t1"], &["cve"], base);
    let b = job_at("http://b", &["t2"], &[], base + Duration::from_secs(1));
    let c = job_at("http://a", &["t2"], &["xss"], base + Duration::from_secs(2));
    // 생성 시각 순서와 다르게 삽입
    store.create_job(&c).await.unwrap();
    store.create_job(&a).await.unwrap();
    store.create_job(&b).await.unwrap();

    let all = store.list_jobs(&JobFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);

    let by_target = store
        .list_jobs(&JobFilter::default().with_target("http://a"))
        .await
        .unwrap();
    assert_eq!(by_target.len(), 2);

    let by_template = store
        .list_jobs(&JobFilter::default().with_template("t2"))
        .await
        .unwrap();
    assert_eq!(by_template.len(), 2);

    let by_tag = store
        .list_jobs(&JobFilter::default().with_template("cve"))
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, a.id);

    let conjunctive = store
        .list_jobs(
            &JobFilter::status(JobStatus::Pending)
                .with_target("http://a")
                .with_template("t2"),
        )
        .await
        .unwrap();
    assert_eq!(conjunctive.len(), 1);
    assert_eq!(conjunctive[0].id, c.id);

    let none = store
        .list_jobs(&JobFilter::status(JobStatus::Running))
        .await
        .unwrap();
    assert!(none.is_empty());
}

async fn list_respects_limit<S: JobStore>(store: S) {
    let base = SystemTime::now();
    let jobs: Vec<Job> = (0..4)
        .map(|i| job_at("http://a", &["t1"], &[], base + Duration::from_secs(i)))
        .collect();
    for job in jobs.iter().rev() {
        store.create_job(job).await.unwrap();
    }

    let first_two = store
        .list_jobs(&JobFilter::status(JobStatus::Pending).with_limit(2))
        .await
        .unwrap();
    let ids: Vec<_> = first_two.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![jobs[0].id, jobs[1].id]);

    let none = store
        .list_jobs(&JobFilter::default().with_limit(0))
        .await
        .unwrap();
    assert!(none.is_empty());

    let beyond = store
        .list_jobs(&JobFilter::default().with_limit(10))
        .await
        .unwrap();
    assert_eq!(beyond.len(), 4);
}

async fn update_is_compare_and_set<S: JobStore>(store: S) {
    let mut job = job_at("http://x", &[], &[], SystemTime::now());
    store.create_job(&job).await.unwrap();
    let stale = job.clone();

    let claim = job.apply(JobEvent::Claimed, SystemTime::now()).unwrap();
    let stored = store.update_status(&claim).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.started_at, job.started_at);

    // 두 번째 claim은 저장소에서 거부됨
    let mut second = stale;
    let claim_again = second.apply(JobEvent::Claimed, SystemTime::now()).unwrap();
    let err = store.update_status(&claim_again).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: JobStatus::Pending,
            actual: JobStatus::Running,
            ..
        }
    ));

    let fail = job
        .apply(JobEvent::Failed("template not found".to_owned()), SystemTime::now())
        .unwrap();
    let stored = store.update_status(&fail).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("template not found"));
    assert!(stored.completed_at.is_some());
    // 대상과 옵션은 변하지 않음
    assert_eq!(stored.target, "http://x");
    assert_eq!(stored.options, job.options);
}

async fn results_keep_append_order<S: JobStore>(store: S) {
    let job = create_running(&store, "http://x").await;
    for seq in 0..5 {
        store.append_result(&result(&job, seq)).await.unwrap();
        // 실행 중 조회도 지금까지의 순서를 그대로 반환
        let partial = store.list_results(job.id).await.unwrap();
        assert_eq!(partial.len() as u64, seq + 1);
    }

    let results = store.list_results(job.id).await.unwrap();
    let seqs: Vec<u64> = results.iter().map(|r| r.sequence).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(results[3], result_like(&results[3], &job, 3));
}

fn result_like(actual: &ScanResult, job: &Job, seq: u64) -> ScanResult {
    let mut expected = result(job, seq);
    expected.matched_at = actual.matched_at;
    expected
}

async fn append_requires_running<S: JobStore>(store: S) {
    let pending = job_at("http://x", &[], &[], SystemTime::now());
    store.create_job(&pending).await.unwrap();
    let err = store.append_result(&result(&pending, 0)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: JobStatus::Running,
            actual: JobStatus::Pending,
            ..
        }
    ));

    let mut running = create_running(&store, "http://y").await;
    store.append_result(&result(&running, 0)).await.unwrap();
    let done = running.apply(JobEvent::Succeeded, SystemTime::now()).unwrap();
    store.update_status(&done).await.unwrap();

    let err = store.append_result(&result(&running, 1)).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    assert_eq!(store.list_results(running.id).await.unwrap().len(), 1);
}

async fn duplicate_result_id_is_rejected<S: JobStore>(store: S) {
    let job = create_running(&store, "http://x").await;
    store.append_result(&result(&job, 0)).await.unwrap();
    let err = store.append_result(&result(&job, 0)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateResult { .. }));
}

async fn delete_cascades_results<S: JobStore>(store: S) {
    let job = create_running(&store, "http://x").await;
    let other = create_running(&store, "http://y").await;
    store.append_result(&result(&job, 0)).await.unwrap();
    store.append_result(&result(&other, 0)).await.unwrap();

    store.delete_job(job.id).await.unwrap();

    assert!(store.get_job(job.id).await.unwrap_err().is_not_found());
    assert!(store.list_results(job.id).await.unwrap_err().is_not_found());
    assert_eq!(store.list_results(other.id).await.unwrap().len(), 1);
}

async fn duplicate_create_is_rejected<S: JobStore>(store: S) {
    let job = job_at("http://x", &[], &[], SystemTime::now());
    store.create_job(&job).await.unwrap();
    let err = store.create_job(&job).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

// =============================================================================
// 메모리 저장소
// =============================================================================

#[tokio::test]
async fn memory_create_and_get() {
    create_and_get_roundtrips(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_missing_job() {
    missing_job_is_not_found(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_list_ordering_and_filters() {
    list_is_ordered_and_filtered(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_list_limit() {
    list_respects_limit(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_compare_and_set() {
    update_is_compare_and_set(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_result_order() {
    results_keep_append_order(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_append_requires_running() {
    append_requires_running(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_duplicate_result() {
    duplicate_result_id_is_rejected(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_delete_cascades() {
    delete_cascades_results(MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_duplicate_create() {
    duplicate_create_is_rejected(MemoryJobStore::new()).await;
}

// =============================================================================
// SQLite 저장소
// =============================================================================

#[tokio::test]
async fn sqlite_create_and_get() {
    let dir = tempfile::tempdir().unwrap();
    create_and_get_roundtrips(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_missing_job() {
    let dir = tempfile::tempdir().unwrap();
    missing_job_is_not_found(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_list_ordering_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    list_is_ordered_and_filtered(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_list_limit() {
    let dir = tempfile::tempdir().unwrap();
    list_respects_limit(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_compare_and_set() {
    let dir = tempfile::tempdir().unwrap();
    update_is_compare_and_set(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_result_order() {
    let dir = tempfile::tempdir().unwrap();
    results_keep_append_order(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_append_requires_running() {
    let dir = tempfile::tempdir().unwrap();
    append_requires_running(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_duplicate_result() {
    let dir = tempfile::tempdir().unwrap();
    duplicate_result_id_is_rejected(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_delete_cascades() {
    let dir = tempfile::tempdir().unwrap();
    delete_cascades_results(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_duplicate_create() {
    let dir = tempfile::tempdir().unwrap();
    duplicate_create_is_rejected(sqlite_store(&dir)).await;
}

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.db");

    let job = {
        let store = SqliteJobStore::open(&path).unwrap();
        let job = create_running(&store, "http://persist").await;
        store.append_result(&result(&job, 0)).await.unwrap();
        job
    };

    let reopened = SqliteJobStore::open(&path).unwrap();
    let fetched = reopened.get_job(job.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Running);
    assert_eq!(fetched.started_at, job.started_at);
    assert_eq!(reopened.list_results(job.id).await.unwrap().len(), 1);
}
