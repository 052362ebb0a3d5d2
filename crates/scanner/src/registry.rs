//! 취소 레지스트리
//!
//! 실행 중인 작업 ID → [`CancellationToken`] 맵입니다. 디스패처 인스턴스마다
//! 하나씩 주입되며 전역 상태가 아닙니다. 세 연산(`register`, `cancel`, `release`)은
//! 모두 같은 뮤텍스 아래에서 수행되므로 자연 종료 정리와 취소 요청이 경합해도
//! 토큰은 최대 한 번만 발동됩니다.
//!
//! 같은 ID를 두 번 등록하면 덮어쓰지 않고 실패합니다 (이중 claim 탐지).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use vigil_core::types::JobId;

use crate::error::ScannerError;

/// 작업별 취소 핸들 레지스트리
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    handles: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    // 맵 연산은 중간 상태를 남기지 않으므로 poison 무시
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 작업의 취소 핸들을 등록합니다.
    ///
    /// # Errors
    ///
    /// 이미 핸들이 있으면 `ScannerError::AlreadyRegistered`
    pub fn register(&self, id: JobId, token: CancellationToken) -> Result<(), ScannerError> {
        let mut handles = self.lock();
        if handles.contains_key(&id) {
            return Err(ScannerError::AlreadyRegistered(id));
        }
        handles.insert(id, token);
        Ok(())
    }

    /// 작업의 핸들을 발동하고 제거합니다.
    ///
    /// 실행 중인 작업이 없으면 `false`를 반환합니다. 동시에 여러 번 호출해도
    /// `true`는 한 번만 반환됩니다.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut handles = self.lock();
        match handles.remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 핸들을 제거합니다. 없으면 아무 일도 하지 않습니다.
    pub fn release(&self, id: JobId) {
        self.lock().remove(&id);
    }

    /// 모든 핸들을 발동하고 비웁니다. 발동한 수를 반환합니다.
    pub fn cancel_all(&self) -> usize {
        let mut handles = self.lock();
        let count = handles.len();
        for (_, token) in handles.drain() {
            token.cancel();
        }
        count
    }

    /// 등록된 핸들이 있는지 확인합니다.
    pub fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
