//! 샘플 품질 채점.

use chrono::{DateTime, Utc};
use mtf_core::{clamp_unit, CollectorSettings, Sample};

/// 가격 이상 감점
const PRICE_PENALTY: f64 = 0.3;
/// 스프레드 이상 감점
const SPREAD_PENALTY: f64 = 0.2;
/// 거래량 이상 감점
const VOLUME_PENALTY: f64 = 0.1;
/// 오래된 샘플 감점
const AGE_PENALTY: f64 = 0.2;
/// 지표 완성도 가중치
const INDICATOR_WEIGHT: f64 = 0.3;

/// 결정적 품질 채점기.
#[derive(Debug, Clone, Copy)]
pub struct QualityScorer<'a> {
    settings: &'a CollectorSettings,
}

impl<'a> QualityScorer<'a> {
    pub fn new(settings: &'a CollectorSettings) -> Self {
        Self { settings }
    }

    /// 품질 점수 `[0, 1]`.
    ///
    /// 비교는 NaN이 항상 감점되도록 부정형으로 작성되어 있습니다.
    pub fn score(&self, sample: &Sample, now: DateTime<Utc>) -> f64 {
        let mut quality = 1.0;

        if !(sample.open > 0.0) || !(sample.close > 0.0) {
            quality -= PRICE_PENALTY;
        }

        let ceiling = self.settings.spread_ceiling(&sample.symbol);
        if !(sample.spread > 0.0) || !(sample.spread <= ceiling) {
            quality -= SPREAD_PENALTY;
        }

        if !(sample.volume >= 0.0) {
            quality -= VOLUME_PENALTY;
        }

        if sample.is_stale(now) {
            quality -= AGE_PENALTY;
        }

        let expected = self.settings.expected_indicators;
        let present = sample.indicators.values().filter(|v| v.is_finite()).count();
        if expected > 0 && present < expected {
            let completeness = present as f64 / expected as f64;
            quality = quality * (1.0 - INDICATOR_WEIGHT) + completeness * INDICATOR_WEIGHT;
        }

        clamp_unit(quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mtf_core::{Bar, MarketBar, Tick, Timeframe};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn indicators(n: usize) -> BTreeMap<String, f64> {
        (0..n).map(|i| (format!("ind{}", i), 1.0)).collect()
    }

    fn sample(open: f64, close: f64, bid: f64, ask: f64, volume: f64, n: usize) -> Sample {
        Sample::from_market_bar(
            "EURUSD",
            Timeframe::M1,
            MarketBar {
                bar: Bar {
                    open_time: now() - Duration::seconds(30),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume,
                },
                tick: Tick { bid, ask },
            },
            indicators(n),
        )
    }

    #[test]
    fn test_clean_sample_scores_one() {
        let settings = CollectorSettings::default();
        let scorer = QualityScorer::new(&settings);
        let s = sample(1.1, 1.1002, 1.1001, 1.1002, 100.0, 5);
        assert!((scorer.score(&s, now()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_penalties_accumulate() {
        let settings = CollectorSettings::default();
        let scorer = QualityScorer::new(&settings);

        // 가격 0, 스프레드 0, 거래량 음수: 1.0 - 0.3 - 0.2 - 0.1
        let s = sample(0.0, 1.1, 1.1, 1.1, -1.0, 5);
        assert!((scorer.score(&s, now()) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_stale_sample_penalized() {
        let settings = CollectorSettings::default();
        let scorer = QualityScorer::new(&settings);
        let s = sample(1.1, 1.1, 1.1001, 1.1002, 10.0, 5);
        let later = now() + Duration::seconds(150);
        assert!((scorer.score(&s, later) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_indicators_blend() {
        let settings = CollectorSettings::default();
        let scorer = QualityScorer::new(&settings);
        let s = sample(1.1, 1.1, 1.1001, 1.1002, 10.0, 2);
        // 1.0 * 0.7 + (2/5) * 0.3
        assert!((scorer.score(&s, now()) - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_symbol_spread_ceiling() {
        let mut settings = CollectorSettings::default();
        settings.spread_ceilings.insert("XAUUSD".to_string(), 1.0);
        let scorer = QualityScorer::new(&settings);

        let mut s = sample(2000.0, 2000.5, 2000.0, 2000.4, 10.0, 5);
        assert!(scorer.score(&s, now()) < 1.0);
        s.symbol = "XAUUSD".to_string();
        assert!((scorer.score(&s, now()) - 1.0).abs() < 1e-12);
    }

    fn any_f64() -> impl Strategy<Value = f64> {
        prop_oneof![
            any::<f64>(),
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            -10.0..10.0f64,
        ]
    }

    proptest! {
        #[test]
        fn prop_score_always_in_unit_interval(
            open in any_f64(),
            close in any_f64(),
            bid in any_f64(),
            ask in any_f64(),
            volume in any_f64(),
            n in 0usize..8,
            age in -100_000i64..1_000_000,
        ) {
            let settings = CollectorSettings::default();
            let scorer = QualityScorer::new(&settings);
            let mut s = sample(open, close, bid, ask, volume, n);
            if let Some(v) = s.indicators.get_mut("ind0") {
                *v = f64::NAN;
            }
            let q = scorer.score(&s, now() + Duration::seconds(age));
            prop_assert!((0.0..=1.0).contains(&q));
        }
    }
}
