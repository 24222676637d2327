//! 동기화 대상 타임프레임 정의.
//!
//! 시작 시점에 고정되는 불변 집합이며, 선언 순서(가장 세밀한 것부터)가
//! 곧 마스터 시리즈 선택 우선순위입니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SyncError;

/// 캔들 집계 단위.
///
/// `Ord`는 단위 길이 순서를 따릅니다 (M1 < M5 < ... < MN1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    M1,
    /// 5분봉
    M5,
    /// 15분봉
    M15,
    /// 30분봉
    M30,
    /// 1시간봉
    H1,
    /// 4시간봉
    H4,
    /// 일봉
    D1,
    /// 주봉
    W1,
    /// 월봉 (30일 근사)
    MN1,
}

impl Timeframe {
    /// 전체 타임프레임 (세밀한 순서).
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN1,
    ];

    /// 기본 수집 대상 타임프레임.
    pub const DEFAULT_ACTIVE: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// 정규 기간(초).
    pub const fn as_secs(&self) -> u64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1800,
            Timeframe::H1 => 3600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
            Timeframe::MN1 => 2_592_000,
        }
    }

    /// 정규 기간.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// 표시 이름 (예: "M1", "H4").
    pub const fn name(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    /// 간격 문자열 (예: "1m", "4h").
    pub const fn interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::MN1 => "1M",
        }
    }

    /// 다른 타임프레임 대비 길이 비율.
    pub fn ratio_to(&self, other: Timeframe) -> f64 {
        self.as_secs() as f64 / other.as_secs() as f64
    }

    /// 지표 계산에 필요한 종가 개수.
    ///
    /// 분 단위 길이를 [50, 200] 구간으로 자릅니다.
    pub fn indicator_lookback(&self) -> usize {
        (self.as_secs() / 60).clamp(50, 200) as usize
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Timeframe {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.name().eq_ignore_ascii_case(s) || tf.interval() == s)
            .ok_or_else(|| SyncError::UnknownTimeframe(s.to_string()))
    }
}
