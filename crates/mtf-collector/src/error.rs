//! 수집기 에러 타입.

use mtf_core::SyncError;
use std::time::Duration;
use thiserror::Error;

/// 업스트림 조회 실패.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// 조회 실패
    #[error("조회 실패: {0}")]
    Fetch(String),

    /// 조회 시간 초과
    #[error("조회 시간 초과 ({0:?})")]
    Timeout(Duration),

    /// 업스트림 연결 끊김
    #[error("연결 끊김: {0}")]
    Disconnected(String),

    /// 잘못된 바 데이터
    #[error("잘못된 바 데이터: {0}")]
    MalformedBar(String),
}

impl SourceError {
    /// 시간 초과 여부.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::Timeout(_))
    }
}

/// 지표 계산 오류.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndicatorError {
    /// 데이터 부족 오류
    #[error("데이터가 부족합니다: 필요 {required}개, 제공 {provided}개")]
    InsufficientData { required: usize, provided: usize },

    /// 잘못된 파라미터
    #[error("잘못된 파라미터: {0}")]
    InvalidParameter(String),

    /// 계산 오류
    #[error("계산 오류: {0}")]
    CalculationError(String),
}

/// 단일 수집 주기 실패.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

/// 엔진 API 에러.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 설정/등록 에러
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// 이미 시작됨
    #[error("엔진이 이미 시작되었습니다")]
    AlreadyRunning,

    /// 종료됨
    #[error("엔진이 종료되었습니다")]
    Stopped,
}

/// 엔진 작업을 위한 Result 타입.
pub type EngineResult<T> = Result<T, EngineError>;
