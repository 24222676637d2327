//! 시뮬레이션 시장 데이터 피드.
//!
//! 시드 고정 랜덤 워크로 심볼별 가격을 만들고, 설정된 비율로 조회 실패와
//! 응답 없음(타임아웃)을 흉내 냅니다. 데몬 실행과 통합 테스트에 사용합니다.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mtf_core::{Bar, MarketBar, SharedClock, Tick, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::source::MarketDataSource;

/// 시뮬레이션 피드 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedFeedConfig {
    /// 난수 시드
    pub seed: u64,
    /// 주기당 최대 가격 변동률 (0.001 = ±0.1%)
    pub volatility: f64,
    /// 조회 실패 비율 [0, 1]
    pub fail_rate: f64,
    /// 응답 없음 비율 [0, 1]
    pub timeout_rate: f64,
    /// 가격 대비 스프레드 비율
    pub spread_ratio: f64,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            volatility: 0.001,
            fail_rate: 0.0,
            timeout_rate: 0.0,
            spread_ratio: 0.00002,
        }
    }
}

/// 알려진 심볼의 시작 가격.
fn base_price(symbol: &str) -> f64 {
    match symbol {
        "EURUSD" => 1.0850,
        "GBPUSD" => 1.2700,
        "USDJPY" => 150.00,
        "AUDUSD" => 0.6550,
        "XAUUSD" => 2300.0,
        _ => 100.0,
    }
}

/// 타임프레임 경계로 내림한 시각.
fn align_to(timeframe: Timeframe, at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = timeframe.as_secs() as i64;
    let ts = at.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(secs), 0)
        .single()
        .unwrap_or(at)
}

#[derive(Debug)]
struct FeedState {
    rng: StdRng,
    prices: HashMap<String, f64>,
}

enum Roll {
    Ok,
    Fail,
    Hang,
}

#[derive(Debug)]
pub struct SimulatedFeed {
    config: SimulatedFeedConfig,
    clock: SharedClock,
    state: Mutex<FeedState>,
    offline: AtomicBool,
    reconnects: AtomicU64,
}

impl SimulatedFeed {
    pub fn new(config: SimulatedFeedConfig, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(FeedState {
                rng: StdRng::seed_from_u64(config.seed),
                prices: HashMap::new(),
            }),
            config,
            clock,
            offline: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
        }
    }

    /// 연결 끊김 상태를 설정합니다. `reconnect`가 성공하면 해제됩니다.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 재연결 횟수.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll(&self) -> Result<Roll, SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Disconnected("시뮬레이션 피드 오프라인".into()));
        }
        let r: f64 = self.lock_state().rng.gen();
        Ok(if r < self.config.fail_rate {
            Roll::Fail
        } else if r < self.config.fail_rate + self.config.timeout_rate {
            Roll::Hang
        } else {
            Roll::Ok
        })
    }

    /// 가격을 한 걸음 진행하고 바를 만듭니다.
    fn next_bar(&self, symbol: &str, timeframe: Timeframe) -> MarketBar {
        let now = self.clock.now();
        let vol = self.config.volatility;
        let mut state = self.lock_state();
        let FeedState { rng, prices } = &mut *state;

        let price = prices
            .entry(symbol.to_string())
            .or_insert_with(|| base_price(symbol));
        let open = *price;
        *price *= 1.0 + rng.gen_range(-vol..=vol);
        let close = *price;

        let high = open.max(close) * (1.0 + rng.gen_range(0.0..=vol));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..=vol));
        let volume = rng.gen_range(10.0..1000.0);
        let half_spread = close * self.config.spread_ratio / 2.0;

        MarketBar {
            bar: Bar {
                open_time: align_to(timeframe, now),
                open,
                high,
                low,
                close,
                volume,
            },
            tick: Tick {
                bid: close - half_spread,
                ask: close + half_spread,
            },
        }
    }
}

#[async_trait]
impl MarketDataSource for SimulatedFeed {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn fetch_latest_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<MarketBar, SourceError> {
        match self.roll()? {
            Roll::Ok => Ok(self.next_bar(symbol, timeframe)),
            Roll::Fail => Err(SourceError::Fetch(format!(
                "{}/{} 시뮬레이션 조회 실패",
                symbol, timeframe
            ))),
            Roll::Hang => {
                debug!(symbol, timeframe = %timeframe, "응답 없음 시뮬레이션");
                std::future::pending().await
            }
        }
    }

    async fn fetch_closes(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<f64>, SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Disconnected("시뮬레이션 피드 오프라인".into()));
        }
        // 긴 타임프레임일수록 봉당 변동폭이 큼
        let vol = self.config.volatility * timeframe.ratio_to(Timeframe::M1).sqrt();
        let mut state = self.lock_state();
        let FeedState { rng, prices } = &mut *state;
        let last = *prices
            .entry(symbol.to_string())
            .or_insert_with(|| base_price(symbol));

        // 현재 가격에서 거꾸로 걸어간 뒤 뒤집어 오래된 순으로 반환
        let mut closes = Vec::with_capacity(count);
        let mut price = last;
        for _ in 0..count {
            closes.push(price);
            price /= 1.0 + rng.gen_range(-vol..=vol);
        }
        closes.reverse();
        Ok(closes)
    }

    async fn reconnect(&self) -> Result<(), SourceError> {
        self.offline.store(false, Ordering::SeqCst);
        let count = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        info!(reconnects = count, "시뮬레이션 피드 재연결");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtf_core::ManualClock;

    fn clock() -> SharedClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap())
    }

    #[tokio::test]
    async fn test_bar_aligned_to_timeframe() {
        let feed = SimulatedFeed::new(SimulatedFeedConfig::default(), clock());
        let m5 = feed.fetch_latest_bar("EURUSD", Timeframe::M5).await.unwrap();
        assert_eq!(
            m5.bar.open_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
        let h1 = feed.fetch_latest_bar("EURUSD", Timeframe::H1).await.unwrap();
        assert_eq!(
            h1.bar.open_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert!(m5.tick.spread() > 0.0);
        assert!(m5.bar.high >= m5.bar.low);
    }

    #[tokio::test]
    async fn test_same_seed_same_prices() {
        let a = SimulatedFeed::new(SimulatedFeedConfig::default(), clock());
        let b = SimulatedFeed::new(SimulatedFeedConfig::default(), clock());
        for _ in 0..5 {
            let x = a.fetch_latest_bar("GBPUSD", Timeframe::M1).await.unwrap();
            let y = b.fetch_latest_bar("GBPUSD", Timeframe::M1).await.unwrap();
            assert_eq!(x, y);
        }
    }

    #[tokio::test]
    async fn test_closes_end_at_current_price() {
        let feed = SimulatedFeed::new(SimulatedFeedConfig::default(), clock());
        let bar = feed.fetch_latest_bar("USDJPY", Timeframe::M1).await.unwrap();
        let closes = feed.fetch_closes("USDJPY", Timeframe::M1, 50).await.unwrap();
        assert_eq!(closes.len(), 50);
        assert_eq!(*closes.last().unwrap(), bar.bar.close);
    }

    #[tokio::test]
    async fn test_offline_until_reconnect() {
        let feed = SimulatedFeed::new(SimulatedFeedConfig::default(), clock());
        feed.set_offline(true);
        assert!(matches!(
            feed.fetch_latest_bar("EURUSD", Timeframe::M1).await,
            Err(SourceError::Disconnected(_))
        ));
        feed.reconnect().await.unwrap();
        assert_eq!(feed.reconnect_count(), 1);
        assert!(feed.fetch_latest_bar("EURUSD", Timeframe::M1).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_rate_one_always_fails() {
        let config = SimulatedFeedConfig {
            fail_rate: 1.0,
            ..SimulatedFeedConfig::default()
        };
        let feed = SimulatedFeed::new(config, clock());
        assert!(matches!(
            feed.fetch_latest_bar("EURUSD", Timeframe::M1).await,
            Err(SourceError::Fetch(_))
        ));
    }
}
