//! 시리즈 샘플 및 동기화 스냅샷.
//!
//! - `Bar` / `Tick` - 업스트림에서 받은 원시 OHLCV 및 호가
//! - `Sample` - 품질 점수가 매겨진 단일 (심볼, 타임프레임) 관측값
//! - `SynchronizedSnapshot` - 한 심볼의 타임프레임 간 정렬된 묶음
//!
//! 발행된 샘플과 스냅샷은 불변이며 `Arc`로 통째로 교체됩니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{SeriesKey, Timeframe};

/// OHLCV 캔들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// 캔들 시작 시간
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 틱 거래량
    pub volume: f64,
}

/// 최우선 호가.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// 매수 호가
    pub bid: f64,
    /// 매도 호가
    pub ask: f64,
}

impl Tick {
    /// 매수/매도 스프레드.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// 업스트림 조회 결과 (최신 캔들 + 호가).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    /// 최신 캔들
    pub bar: Bar,
    /// 현재 호가
    pub tick: Tick,
}

/// 단일 (심볼, 타임프레임) 관측값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// 거래 심볼
    pub symbol: String,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 캔들 시작 시간
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 틱 거래량
    pub volume: f64,
    /// 매수 호가
    pub bid: f64,
    /// 매도 호가
    pub ask: f64,
    /// 스프레드 (ask - bid)
    pub spread: f64,
    /// 지표 값 (일부만 있을 수 있음)
    pub indicators: BTreeMap<String, f64>,
    /// 데이터 품질 점수 [0, 1]
    pub quality_score: f64,
    /// 스냅샷에 포함되었는지 여부
    pub synchronized: bool,
    /// 스냅샷 포함 시각
    pub sync_timestamp: Option<DateTime<Utc>>,
}

impl Sample {
    /// 조회 결과로부터 미채점 샘플을 생성합니다. 품질 점수는 0으로 시작합니다.
    pub fn from_market_bar(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        market: MarketBar,
        indicators: BTreeMap<String, f64>,
    ) -> Self {
        let MarketBar { bar, tick } = market;
        Self {
            symbol: symbol.into(),
            timeframe,
            timestamp: bar.open_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            bid: tick.bid,
            ask: tick.ask,
            spread: tick.spread(),
            indicators,
            quality_score: 0.0,
            synchronized: false,
            sync_timestamp: None,
        }
    }

    /// 품질 점수를 설정한 새 샘플을 반환합니다. NaN은 0으로, 나머지는 [0, 1]로 고정됩니다.
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = clamp_unit(score);
        self
    }

    /// 시리즈 키.
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.timeframe)
    }

    /// 스냅샷 포함 표시가 된 복사본.
    pub fn synchronized_copy(&self, at: DateTime<Utc>) -> Self {
        Self {
            synchronized: true,
            sync_timestamp: Some(at),
            ..self.clone()
        }
    }

    /// 기준 시각 대비 경과 시간(초). 미래 시각이면 음수.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// 타임프레임 주기의 2배보다 오래된 샘플인지.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age_secs(now) > 2.0 * self.timeframe.as_secs() as f64
    }
}

/// 한 심볼의 타임프레임 간 정렬된 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizedSnapshot {
    /// 거래 심볼
    pub symbol: String,
    /// 마스터 타임프레임
    pub master_timeframe: Timeframe,
    /// 마스터 샘플 시각
    pub master_timestamp: DateTime<Utc>,
    /// 최소 동기화 품질을 충족한 샘플
    pub timeframes: BTreeMap<Timeframe, Sample>,
    /// 포함된 쌍별 품질의 평균
    pub sync_quality: f64,
    /// 마스터 대비 시간 차이(초)
    pub lag: BTreeMap<Timeframe, f64>,
    /// 스냅샷 생성 시각
    pub created_at: DateTime<Utc>,
}

impl SynchronizedSnapshot {
    /// 스냅샷 생성 후 경과 시간(초). 호출자가 신선도를 판단할 때 사용합니다.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// 특정 타임프레임 샘플 조회.
    pub fn get(&self, timeframe: Timeframe) -> Option<&Sample> {
        self.timeframes.get(&timeframe)
    }
}

/// NaN을 0으로 보고 [0, 1] 구간으로 고정합니다.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn market_bar() -> MarketBar {
        MarketBar {
            bar: Bar {
                open_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                open: 1.0850,
                high: 1.0860,
                low: 1.0845,
                close: 1.0855,
                volume: 120.0,
            },
            tick: Tick {
                bid: 1.0854,
                ask: 1.0856,
            },
        }
    }

    #[test]
    fn test_from_market_bar() {
        let sample = Sample::from_market_bar("EURUSD", Timeframe::M5, market_bar(), BTreeMap::new());
        assert_eq!(sample.key(), SeriesKey::new("EURUSD", Timeframe::M5));
        assert!((sample.spread - 0.0002).abs() < 1e-9);
        assert!(!sample.synchronized);
    }

    #[test]
    fn test_with_quality_clamps() {
        let base = Sample::from_market_bar("EURUSD", Timeframe::M1, market_bar(), BTreeMap::new());
        assert_eq!(base.clone().with_quality(1.7).quality_score, 1.0);
        assert_eq!(base.clone().with_quality(-0.3).quality_score, 0.0);
        assert_eq!(base.with_quality(f64::NAN).quality_score, 0.0);
    }

    #[test]
    fn test_synchronized_copy_leaves_original() {
        let base = Sample::from_market_bar("EURUSD", Timeframe::M1, market_bar(), BTreeMap::new());
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        let copy = base.synchronized_copy(at);
        assert!(copy.synchronized);
        assert_eq!(copy.sync_timestamp, Some(at));
        assert!(!base.synchronized);
    }
}
