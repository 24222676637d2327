//! `ta` 크레이트 기반 지표 계산기.
//!
//! 제공 지표:
//! - RSI (14)
//! - EMA 단기/장기 (20 / 50)
//! - 볼린저 밴드 (20, 2σ)
//! - MACD (12, 26, 9) - M5 이상
//! - 수익률 변동성 (최근 20개, %)
//!
//! 종가가 부족한 지표는 결과에서 빠지며, 수집기의 품질 점수가 누락분을 반영합니다.

use mtf_core::Timeframe;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::Next;

use crate::error::IndicatorError;
use crate::source::{IndicatorCalculator, IndicatorMap};

/// 계산에 필요한 최소 종가 수.
pub const MIN_CLOSES: usize = 20;

/// 지표 파라미터.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_short: 20,
            ema_long: 50,
            bb_period: 20,
            bb_multiplier: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_window: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaIndicatorCalculator {
    params: IndicatorParams,
}

impl TaIndicatorCalculator {
    pub fn new(params: IndicatorParams) -> Self {
        Self { params }
    }

    fn invalid(err: impl std::fmt::Debug) -> IndicatorError {
        IndicatorError::InvalidParameter(format!("{:?}", err))
    }

    /// 마지막 출력값. 워밍업 구간보다 짧으면 `None`.
    fn last_of<I, O>(indicator: &mut I, closes: &[f64], warmup: usize) -> Option<O>
    where
        I: Next<f64, Output = O>,
    {
        if closes.len() < warmup {
            return None;
        }
        closes.iter().fold(None, |_, close| Some(indicator.next(*close)))
    }

    /// 최근 수익률 표준편차 (%).
    fn volatility(closes: &[f64], window: usize) -> Option<f64> {
        if closes.len() <= window {
            return None;
        }
        let tail = &closes[closes.len() - window - 1..];
        let returns: Vec<f64> = tail
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
        Some(variance.sqrt() * 100.0)
    }
}

impl IndicatorCalculator for TaIndicatorCalculator {
    fn compute(&self, timeframe: Timeframe, closes: &[f64]) -> Result<IndicatorMap, IndicatorError> {
        if closes.len() < MIN_CLOSES {
            return Err(IndicatorError::InsufficientData {
                required: MIN_CLOSES,
                provided: closes.len(),
            });
        }
        if closes.iter().any(|c| !c.is_finite()) {
            return Err(IndicatorError::CalculationError(
                "종가에 유한하지 않은 값이 있습니다".into(),
            ));
        }

        let p = &self.params;
        let mut values = IndicatorMap::new();

        let mut rsi = RelativeStrengthIndex::new(p.rsi_period).map_err(Self::invalid)?;
        if let Some(v) = Self::last_of(&mut rsi, closes, p.rsi_period + 1) {
            values.insert("rsi".into(), v);
        }

        let mut ema_short = ExponentialMovingAverage::new(p.ema_short).map_err(Self::invalid)?;
        if let Some(v) = Self::last_of(&mut ema_short, closes, p.ema_short) {
            values.insert("ema_short".into(), v);
        }

        let mut ema_long = ExponentialMovingAverage::new(p.ema_long).map_err(Self::invalid)?;
        if let Some(v) = Self::last_of(&mut ema_long, closes, p.ema_long) {
            values.insert("ema_long".into(), v);
        }

        let mut bb = BollingerBands::new(p.bb_period, p.bb_multiplier).map_err(Self::invalid)?;
        if let Some(out) = Self::last_of(&mut bb, closes, p.bb_period) {
            values.insert("bb_upper".into(), out.upper);
            values.insert("bb_middle".into(), out.average);
            values.insert("bb_lower".into(), out.lower);
        }

        // 1분봉은 MACD 생략
        if timeframe >= Timeframe::M5 {
            let mut macd =
                MovingAverageConvergenceDivergence::new(p.macd_fast, p.macd_slow, p.macd_signal)
                    .map_err(Self::invalid)?;
            if let Some(out) = Self::last_of(&mut macd, closes, p.macd_slow + p.macd_signal) {
                values.insert("macd".into(), out.macd);
                values.insert("macd_signal".into(), out.signal);
            }
        }

        if let Some(v) = Self::volatility(closes, p.volatility_window) {
            values.insert("volatility".into(), v);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5 + (i as f64).sin()).collect()
    }

    #[test]
    fn test_insufficient_closes() {
        let calc = TaIndicatorCalculator::default();
        let err = calc.compute(Timeframe::M1, &trend(10)).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::InsufficientData {
                required: 20,
                provided: 10
            }
        );
    }

    #[test]
    fn test_partial_result_for_short_history() {
        let calc = TaIndicatorCalculator::default();
        let values = calc.compute(Timeframe::M5, &trend(30)).unwrap();
        assert!(values.contains_key("rsi"));
        assert!(values.contains_key("ema_short"));
        assert!(values.contains_key("bb_middle"));
        assert!(!values.contains_key("ema_long"));
        assert!(!values.contains_key("macd"));
    }

    #[test]
    fn test_full_result() {
        let calc = TaIndicatorCalculator::default();
        let closes = trend(200);
        let m5 = calc.compute(Timeframe::M5, &closes).unwrap();
        for name in [
            "rsi",
            "ema_short",
            "ema_long",
            "bb_upper",
            "bb_middle",
            "bb_lower",
            "macd",
            "macd_signal",
            "volatility",
        ] {
            assert!(m5.get(name).is_some_and(|v| v.is_finite()), "{name}");
        }
        assert!(m5["bb_upper"] >= m5["bb_middle"] && m5["bb_middle"] >= m5["bb_lower"]);
        assert!((0.0..=100.0).contains(&m5["rsi"]));

        let m1 = calc.compute(Timeframe::M1, &closes).unwrap();
        assert!(!m1.contains_key("macd"));
    }

    #[test]
    fn test_rejects_non_finite() {
        let calc = TaIndicatorCalculator::default();
        let mut closes = trend(30);
        closes[3] = f64::NAN;
        assert!(matches!(
            calc.compute(Timeframe::M1, &closes),
            Err(IndicatorError::CalculationError(_))
        ));
    }
}
