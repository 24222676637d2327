//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mtf_collector::{IndicatorCalculator, IndicatorError, IndicatorMap, MarketDataSource, SourceError};
use mtf_core::{Bar, ManualClock, MarketBar, SyncConfig, Tick, Timeframe};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    ManualClock::new(base_time())
}

/// One scripted response of `fetch_latest_bar`.
#[derive(Debug, Clone)]
pub enum Step {
    Bar(DateTime<Utc>),
    Fail,
    Disconnect,
    Hang,
}

/// Data source replaying a script; answers with a clean bar at `base_time` once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    fetches: AtomicUsize,
    reconnects: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn bar_at(at: DateTime<Utc>) -> MarketBar {
        MarketBar {
            bar: Bar {
                open_time: at,
                open: 1.1000,
                high: 1.1010,
                low: 1.0990,
                close: 1.1005,
                volume: 120.0,
            },
            tick: Tick {
                bid: 1.1004,
                ask: 1.1006,
            },
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_latest_bar(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<MarketBar, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step.unwrap_or(Step::Bar(base_time())) {
            Step::Bar(at) => Ok(Self::bar_at(at)),
            Step::Fail => Err(SourceError::Fetch("scripted failure".into())),
            Step::Disconnect => Err(SourceError::Disconnected("scripted disconnect".into())),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn fetch_closes(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<f64>, SourceError> {
        Ok((0..count).map(|i| 1.1 + i as f64 * 0.0001).collect())
    }

    async fn reconnect(&self) -> Result<(), SourceError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Calculator returning a fixed, complete indicator set.
#[derive(Debug, Clone, Copy)]
pub struct FixedIndicators(pub usize);

impl IndicatorCalculator for FixedIndicators {
    fn compute(&self, _timeframe: Timeframe, _closes: &[f64]) -> Result<IndicatorMap, IndicatorError> {
        Ok((0..self.0).map(|i| (format!("ind_{i}"), 50.0)).collect())
    }
}

/// Single symbol configuration with the given timeframes.
pub fn config_for(timeframes: &[Timeframe]) -> SyncConfig {
    SyncConfig {
        symbols: vec!["EURUSD".to_string()],
        timeframes: timeframes.to_vec(),
        ..SyncConfig::default()
    }
}
