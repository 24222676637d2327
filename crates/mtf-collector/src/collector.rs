//! (심볼, 타임프레임)별 수집기.
//!
//! 각 수집기는 독립된 주기로 최신 바를 조회하고 지표를 계산한 뒤 품질을 채점해
//! 시리즈 슬롯에 게시합니다. 조회 실패는 호출자에게 전파되지 않고 Fault로 보고되며,
//! 수집기는 다음 주기에 그대로 계속합니다.

use mtf_core::{series_span, Sample, SeriesKey, SharedClock, Ticker};
use mtf_recovery::{FaultId, FaultKind, FaultSeverity, NewFault, RecoveryEngine};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::error::{CollectError, SourceError};
use crate::live_config::LiveConfig;
use crate::quality::QualityScorer;
use crate::source::{IndicatorCalculator, MarketDataSource};
use crate::store::{PublishOutcome, SeriesSlot};

#[derive(Debug, Default)]
struct CollectorState {
    consecutive_timeouts: u32,
    /// 아직 해결되지 않은 이 시리즈의 Fault (오래된 순)
    outstanding: VecDeque<FaultId>,
    polls: u64,
    failures: u64,
}

/// 수집기 상태 요약.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorStatus {
    pub key: SeriesKey,
    pub polls: u64,
    pub failures: u64,
    pub consecutive_timeouts: u32,
    pub outstanding_faults: usize,
}

/// 단일 시리즈 수집기.
pub struct SeriesCollector {
    key: SeriesKey,
    slot: Arc<SeriesSlot>,
    source: Arc<dyn MarketDataSource>,
    indicators: Arc<dyn IndicatorCalculator>,
    config: Arc<LiveConfig>,
    recovery: RecoveryEngine,
    clock: SharedClock,
    state: Mutex<CollectorState>,
}

impl SeriesCollector {
    pub fn new(
        slot: Arc<SeriesSlot>,
        source: Arc<dyn MarketDataSource>,
        indicators: Arc<dyn IndicatorCalculator>,
        config: Arc<LiveConfig>,
        recovery: RecoveryEngine,
        clock: SharedClock,
    ) -> Self {
        Self {
            key: slot.key().clone(),
            slot,
            source,
            indicators,
            config,
            recovery,
            clock,
            state: Mutex::new(CollectorState::default()),
        }
    }

    /// 시리즈 키.
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// 상태 요약.
    pub fn status(&self) -> CollectorStatus {
        let state = self.lock_state();
        CollectorStatus {
            key: self.key.clone(),
            polls: state.polls,
            failures: state.failures,
            consecutive_timeouts: state.consecutive_timeouts,
            outstanding_faults: state.outstanding.len(),
        }
    }

    /// 한 번 수집하고 게시합니다. Fault 보고는 하지 않습니다.
    ///
    /// 복구 엔진의 Retry 동작도 이 경로를 사용합니다.
    pub async fn collect(&self) -> Result<PublishOutcome, CollectError> {
        let config = self.config.get();
        let timeout = config.collector.fetch_timeout();
        let symbol = self.key.symbol.as_str();
        let timeframe = self.key.timeframe;
        let lookback = timeframe.indicator_lookback();

        let (market, closes) = futures::try_join!(
            with_deadline(timeout, self.source.fetch_latest_bar(symbol, timeframe)),
            with_deadline(timeout, self.source.fetch_closes(symbol, timeframe, lookback)),
        )?;

        let indicators = self.indicators.compute(timeframe, &closes)?;
        let unscored = Sample::from_market_bar(symbol, timeframe, market, indicators);

        let now = self.clock.now();
        let score = QualityScorer::new(&config.collector).score(&unscored, now);
        let sample = unscored.with_quality(score);
        let timestamp = sample.timestamp;

        let outcome = self.slot.publish(sample);
        debug!(
            symbol,
            timeframe = %timeframe,
            quality = score,
            timestamp = %timestamp,
            outcome = ?outcome,
            "샘플 수집"
        );
        Ok(outcome)
    }

    /// 한 주기를 실행합니다. 실패는 Fault로 보고되고 호출자에게는 결과만 돌려줍니다.
    pub async fn poll_once(&self) -> Result<PublishOutcome, CollectError> {
        self.lock_state().polls += 1;
        let result = self.collect().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        result
    }

    /// 종료 신호까지 고정 주기로 수집합니다.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let span = series_span!("collector", self.key.symbol, self.key.timeframe);
        async move {
            let interval = self.config.get().collector.poll_interval();
            let mut ticker = Ticker::new("collector", interval);
            info!(interval = ?interval, source = self.source.name(), "수집기 시작");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = self.poll_once().await;
                    }
                }
            }
            info!(skipped_ticks = ticker.skipped(), "수집기 종료");
        }
        .instrument(span)
        .await
    }

    /// 수집 상태를 초기화합니다.
    ///
    /// 타임아웃 카운트만 지웁니다. 게시된 샘플은 최신 시각 기준으로 남고,
    /// 미해결 Fault는 다음 성공 수집에서 해결됩니다.
    pub fn reset(&self) {
        let outstanding = {
            let mut state = self.lock_state();
            state.consecutive_timeouts = 0;
            state.outstanding.len()
        };
        info!(series = %self.key, outstanding, "수집 상태 초기화");
    }

    /// 업스트림 재연결.
    pub async fn reconnect(&self) -> Result<(), SourceError> {
        self.source.reconnect().await
    }

    fn on_success(&self) {
        let outstanding: Vec<FaultId> = {
            let mut state = self.lock_state();
            state.consecutive_timeouts = 0;
            state.outstanding.drain(..).collect()
        };

        // 성공 한 번에 미해결 Fault 하나를 해결
        let mut remaining = outstanding.into_iter();
        for id in remaining.by_ref() {
            if self.recovery.resolve_fault(id, "다음 수집 주기에서 정상 수집") {
                break;
            }
        }

        let rest: Vec<FaultId> = remaining.collect();
        if !rest.is_empty() {
            let mut state = self.lock_state();
            for id in rest.into_iter().rev() {
                state.outstanding.push_front(id);
            }
        }
    }

    fn on_failure(&self, error: &CollectError) {
        let config = self.config.get();
        let threshold = config.collector.timeout_escalation_threshold;
        let timeouts = {
            let mut state = self.lock_state();
            state.failures += 1;
            match error {
                CollectError::Source(e) if e.is_timeout() => {
                    state.consecutive_timeouts += 1;
                }
                _ => state.consecutive_timeouts = 0,
            }
            state.consecutive_timeouts
        };

        let (kind, severity) = if timeouts >= threshold {
            (FaultKind::Connection, FaultSeverity::High)
        } else {
            (FaultKind::Data, FaultSeverity::Medium)
        };

        warn!(
            series = %self.key,
            error = %error,
            consecutive_timeouts = timeouts,
            "수집 실패"
        );

        let id = self.recovery.report(
            NewFault::new(kind, format!("{} 수집 실패: {}", self.key, error))
                .severity(severity)
                .with_context("symbol", &self.key.symbol)
                .with_context("timeframe", self.key.timeframe)
                .with_context("consecutive_timeouts", timeouts)
                .detail(format!("{:?}", error)),
        );
        let evicted = {
            let mut state = self.lock_state();
            let evicted = if state.outstanding.len() >= config.recovery.history_capacity {
                state.outstanding.pop_front()
            } else {
                None
            };
            state.outstanding.push_back(id);
            evicted
        };
        if let Some(oldest) = evicted {
            warn!(
                series = %self.key,
                fault_id = %oldest,
                "미해결 Fault 추적 한도 초과, 가장 오래된 Fault 해결 처리"
            );
            self.recovery
                .resolve_fault(oldest, "추적 한도 초과로 이후 Fault에 병합");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}
