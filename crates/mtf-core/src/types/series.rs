//! 시리즈 식별자.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Timeframe;

/// (심볼, 타임프레임) 쌍. 컬렉터 등록 시 유일성 키로 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// 거래 심볼
    pub symbol: String,
    /// 타임프레임
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// 새 키를 생성합니다.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.timeframe)
    }
}
