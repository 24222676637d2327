//! 동기화 시스템의 에러 타입.
//!
//! 실행 중인 워커 루프는 이 에러를 호출자에게 전파하지 않습니다.
//! 수집/동기화 실패는 모두 Fault로 보고되며, 여기 정의된 에러는
//! 시작/설정 단계와 등록 API에서만 반환됩니다.

use thiserror::Error;

use crate::types::SeriesKey;

/// 핵심 동기화 에러.
#[derive(Debug, Error)]
pub enum SyncError {
    /// 설정 값 검증 실패
    #[error("설정 에러: {0}")]
    Config(String),

    /// 설정 소스 로딩 실패 (파일, 환경변수)
    #[error("설정 로딩 에러: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// 동일한 (심볼, 타임프레임)에 대한 중복 등록
    #[error("이미 등록된 시리즈: {0}")]
    DuplicateSeries(SeriesKey),

    /// 등록되지 않은 시리즈
    #[error("등록되지 않은 시리즈: {0}")]
    UnknownSeries(SeriesKey),

    /// 알 수 없는 타임프레임 이름
    #[error("알 수 없는 타임프레임: {0}")]
    UnknownTimeframe(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 엔진 상태 에러 (이미 실행 중, 종료됨 등)
    #[error("상태 에러: {0}")]
    State(String),
}

/// 동기화 작업을 위한 Result 타입.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// 설정 단계 에러인지 확인합니다.
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::ConfigSource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    #[test]
    fn test_config_errors() {
        assert!(SyncError::Config("capacity".into()).is_config());
        let dup = SyncError::DuplicateSeries(SeriesKey::new("EURUSD", Timeframe::M1));
        assert!(!dup.is_config());
        assert!(dup.to_string().contains("EURUSD/M1"));
    }
}
