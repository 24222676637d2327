//! 복구 엔진 에러 타입.

use thiserror::Error;

use crate::strategy::RecoveryAction;

/// 복구 동작 실패.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecoveryError {
    /// 동작이 이 Fault에 적용될 수 없음 (예: 시리즈 컨텍스트 없는 Retry)
    #[error("{action} 동작을 적용할 수 없음: {reason}")]
    NotApplicable {
        action: RecoveryAction,
        reason: String,
    },

    /// 복구 핸들러가 설치되지 않음
    #[error("복구 핸들러 미설치")]
    HandlerMissing,

    /// 등록된 대체 경로 없음
    #[error("대체 경로 미등록: {0}")]
    NoFallback(String),

    /// 동작 실행 실패
    #[error("복구 동작 실패: {0}")]
    ActionFailed(String),

    /// 동작 시간 초과
    #[error("복구 동작 시간 초과: {0}")]
    Timeout(String),

    /// 알림 전송 실패
    #[error("알림 전송 실패: {0}")]
    Alert(String),
}

impl RecoveryError {
    /// 적용 불가 에러를 생성합니다.
    pub fn not_applicable(action: RecoveryAction, reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            action,
            reason: reason.into(),
        }
    }
}

/// 복구 작업을 위한 Result 타입.
pub type RecoveryResult<T> = Result<T, RecoveryError>;
