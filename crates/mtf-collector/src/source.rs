//! 외부 협력자 인터페이스.

use async_trait::async_trait;
use mtf_core::{MarketBar, Timeframe};
use std::collections::BTreeMap;

use crate::error::{IndicatorError, SourceError};

/// 시장 데이터 공급자.
///
/// 구현체는 각 호출에 자체 타임아웃을 둘 수 있으며, 수집기는 그 위에
/// 설정된 조회 제한 시간을 추가로 적용합니다.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// 공급자 이름 (로그용).
    fn name(&self) -> &str;

    /// 최신 바와 호가를 조회합니다.
    async fn fetch_latest_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<MarketBar, SourceError>;

    /// 지표 계산용 최근 종가를 오래된 순으로 조회합니다.
    async fn fetch_closes(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<f64>, SourceError>;

    /// 업스트림 세션을 다시 수립합니다.
    async fn reconnect(&self) -> Result<(), SourceError>;
}

/// 지표 이름 → 값.
pub type IndicatorMap = BTreeMap<String, f64>;

/// 지표 계산기. 계산 가능한 지표만 채운 부분 결과를 반환할 수 있습니다.
pub trait IndicatorCalculator: Send + Sync {
    fn compute(&self, timeframe: Timeframe, closes: &[f64]) -> Result<IndicatorMap, IndicatorError>;
}
