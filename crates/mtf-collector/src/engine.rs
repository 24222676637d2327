//! 수집기, 동기화기, 복구 엔진을 묶는 실행 엔진.
//!
//! 시작 시 한 번 생성되어 모든 워커에 참조로 전달됩니다. 호출자는 이 엔진을 통해
//! 스냅샷, 시리즈 샘플, 헬스 상태를 조회하고 Fault를 보고/해결합니다.

use chrono::{DateTime, Utc};
use mtf_core::{
    ConfigDelta, Sample, SeriesKey, SharedClock, SyncConfig, SynchronizedSnapshot, SystemClock,
    Timeframe,
};
use mtf_recovery::{
    AlertSink, Fault, FaultContext, FaultEvent, FaultId, FaultKind, FaultReport, FaultSeverity,
    HealthReport, RecoveryEngine, RecoveryEngineBuilder, RecoveryResult, StrategyTable,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::collector::{CollectorStatus, SeriesCollector};
use crate::error::{EngineError, EngineResult};
use crate::handler::{CollectorMap, CollectorRecoveryHandler};
use crate::live_config::LiveConfig;
use crate::source::{IndicatorCalculator, MarketDataSource};
use crate::stats::SyncStats;
use crate::store::SeriesStore;
use crate::synchronizer::Synchronizer;

/// 엔진 상태 요약.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub tracked_symbols: usize,
    pub synchronized_symbols: usize,
    pub active_timeframes: Vec<Timeframe>,
    pub series: usize,
    pub stats: SyncStats,
    pub healthy: bool,
    pub active_faults: usize,
    #[serde(skip)]
    pub collectors: Vec<CollectorStatus>,
    pub generated_at: DateTime<Utc>,
}

/// 엔진 빌더.
pub struct MtfEngineBuilder {
    config: SyncConfig,
    source: Arc<dyn MarketDataSource>,
    indicators: Arc<dyn IndicatorCalculator>,
    clock: SharedClock,
    recovery: RecoveryEngineBuilder,
}

impl MtfEngineBuilder {
    /// 벽시계를 지정합니다.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// 에스컬레이션 알림 수신자를 지정합니다.
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.recovery = self.recovery.alert_sink(sink);
        self
    }

    /// Fault 종류별 대체 경로를 등록합니다.
    pub fn fallback<F>(mut self, kind: FaultKind, handler: F) -> Self
    where
        F: Fn(&Fault) -> RecoveryResult<()> + Send + Sync + 'static,
    {
        self.recovery = self.recovery.fallback(kind, handler);
        self
    }

    /// 복구 전략 테이블을 교체합니다.
    pub fn strategies(mut self, strategies: StrategyTable) -> Self {
        self.recovery = self.recovery.strategies(strategies);
        self
    }

    /// 설정을 검증하고 설정된 모든 (심볼, 타임프레임) 시리즈를 등록합니다.
    pub fn build(self) -> EngineResult<MtfEngine> {
        let live = Arc::new(LiveConfig::new(self.config)?);
        let config = live.get();
        let store = Arc::new(SeriesStore::new(config.collector.history_capacity)?);

        let cancel = CancellationToken::new();
        let collectors: Arc<CollectorMap> = Arc::new(RwLock::new(BTreeMap::new()));
        let handler = Arc::new(CollectorRecoveryHandler::new(
            &collectors,
            Arc::clone(&self.source),
        ));
        let recovery = self
            .recovery
            .clock(Arc::clone(&self.clock))
            .cancel_token(cancel.child_token())
            .handler(handler)
            .build();

        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&store),
            Arc::clone(&live),
            Arc::clone(&self.clock),
            recovery.clone(),
        ));

        let engine = MtfEngine {
            config: live,
            store,
            source: self.source,
            indicators: self.indicators,
            clock: self.clock,
            recovery,
            synchronizer,
            collectors,
            cancel,
            tracker: TaskTracker::new(),
            running: AtomicBool::new(false),
        };

        for symbol in &config.symbols {
            for timeframe in &config.timeframes {
                engine.register_series(symbol, *timeframe)?;
            }
        }

        info!(
            symbols = config.symbols.len(),
            timeframes = config.timeframes.len(),
            source = engine.source.name(),
            "MTF 엔진 생성"
        );
        Ok(engine)
    }
}

/// 멀티 타임프레임 수집/동기화 엔진.
pub struct MtfEngine {
    config: Arc<LiveConfig>,
    store: Arc<SeriesStore>,
    source: Arc<dyn MarketDataSource>,
    indicators: Arc<dyn IndicatorCalculator>,
    clock: SharedClock,
    recovery: RecoveryEngine,
    synchronizer: Arc<Synchronizer>,
    collectors: Arc<CollectorMap>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: AtomicBool,
}

impl MtfEngine {
    /// 빌더를 생성합니다.
    pub fn builder(
        config: SyncConfig,
        source: Arc<dyn MarketDataSource>,
        indicators: Arc<dyn IndicatorCalculator>,
    ) -> MtfEngineBuilder {
        MtfEngineBuilder {
            recovery: RecoveryEngine::builder(config.recovery.clone()),
            config,
            source,
            indicators,
            clock: SystemClock::shared(),
        }
    }

    /// 기본 구성으로 생성합니다.
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn MarketDataSource>,
        indicators: Arc<dyn IndicatorCalculator>,
    ) -> EngineResult<Self> {
        Self::builder(config, source, indicators).build()
    }

    /// 시리즈를 등록합니다. 같은 (심볼, 타임프레임)은 한 번만 등록됩니다.
    ///
    /// 엔진이 실행 중이면 수집기 루프도 바로 시작합니다.
    pub fn register_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Arc<SeriesCollector>> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        let slot = self.store.register(SeriesKey::new(symbol, timeframe))?;
        let collector = Arc::new(SeriesCollector::new(
            slot,
            Arc::clone(&self.source),
            Arc::clone(&self.indicators),
            Arc::clone(&self.config),
            self.recovery.clone(),
            Arc::clone(&self.clock),
        ));
        self.collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collector.key().clone(), Arc::clone(&collector));

        if self.is_running() {
            self.spawn_collector(&collector);
        }
        Ok(collector)
    }

    /// 모든 워커를 시작합니다.
    pub fn start(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        let collectors = self.collectors_snapshot();
        for collector in &collectors {
            self.spawn_collector(collector);
        }

        let synchronizer = Arc::clone(&self.synchronizer);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            synchronizer.run(cancel).await;
        });

        self.recovery.start_sweeper();

        info!(collectors = collectors.len(), "MTF 엔진 시작");
        Ok(())
    }

    /// 종료 신호를 보내고 유예 시간 동안 워커 종료를 기다립니다.
    ///
    /// 모든 워커가 유예 시간 안에 끝나면 `true`.
    pub async fn shutdown(&self) -> bool {
        let grace = self.config.get().engine.shutdown_grace();
        info!(grace = ?grace, "MTF 엔진 종료 중...");
        self.cancel.cancel();
        self.tracker.close();

        let started = tokio::time::Instant::now();
        let workers_done = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !workers_done {
            warn!(remaining = self.tracker.len(), "유예 시간 내에 워커가 종료되지 않음");
        }
        let remaining = grace.saturating_sub(started.elapsed());
        let recovery_done = self.recovery.shutdown(remaining).await;

        self.running.store(false, Ordering::SeqCst);
        info!(clean = workers_done && recovery_done, "MTF 엔진 종료");
        workers_done && recovery_done
    }

    /// 실행 중 여부.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 심볼의 마지막 스냅샷.
    pub fn get_snapshot(&self, symbol: &str) -> Option<Arc<SynchronizedSnapshot>> {
        self.synchronizer.snapshot(symbol)
    }

    /// 시리즈의 최신 샘플. 알 수 없는 타임프레임 이름이면 `None`.
    pub fn get_series(&self, symbol: &str, timeframe: &str) -> Option<Arc<Sample>> {
        let timeframe: Timeframe = timeframe.parse().ok()?;
        self.series(symbol, timeframe)
    }

    /// 시리즈의 최신 샘플.
    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Sample>> {
        self.store.latest(&SeriesKey::new(symbol, timeframe))
    }

    /// 시리즈 이력 (최신순, 최대 `limit`개).
    pub fn history(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Arc<Sample>> {
        self.store.history(&SeriesKey::new(symbol, timeframe), limit)
    }

    /// 심볼의 게시된 모든 샘플.
    pub fn latest(&self, symbol: &str) -> BTreeMap<Timeframe, Arc<Sample>> {
        self.store.latest_for_symbol(symbol)
    }

    /// 현재 헬스 상태.
    pub fn get_health(&self) -> Arc<HealthReport> {
        self.recovery.health()
    }

    /// Fault를 보고합니다.
    pub fn report_fault(
        &self,
        kind: FaultKind,
        message: impl Into<String>,
        context: FaultContext,
        severity: FaultSeverity,
    ) -> FaultId {
        self.recovery.report_fault(kind, message, context, severity)
    }

    /// Fault를 해결합니다. 처음 해결한 경우에만 `true`.
    pub fn resolve_fault(&self, id: FaultId, note: impl Into<String>) -> bool {
        self.recovery.resolve_fault(id, note)
    }

    /// 설정 변경분을 적용하고 실행 중인 컴포넌트에 반영합니다.
    pub fn apply_delta(&self, delta: &ConfigDelta) -> EngineResult<Arc<SyncConfig>> {
        let updated = self.config.apply(delta)?;
        let recovery = &updated.recovery;
        self.recovery
            .set_thresholds(recovery.consecutive_fault_threshold, recovery.max_active_faults);
        info!(delta = ?delta, "설정 변경 적용");
        Ok(updated)
    }

    /// 현재 설정.
    pub fn config(&self) -> Arc<SyncConfig> {
        self.config.get()
    }

    /// 등록된 모든 심볼을 즉시 한 번 동기화합니다.
    pub fn sync_now(&self) -> usize {
        self.synchronizer.sync_all()
    }

    /// 상태 요약.
    pub fn status(&self) -> EngineStatus {
        let config = self.config.get();
        let health = self.recovery.health();
        EngineStatus {
            running: self.is_running(),
            tracked_symbols: self.store.symbols().len(),
            synchronized_symbols: self.synchronizer.synchronized_symbols(),
            active_timeframes: config.timeframes.clone(),
            series: self.store.keys().len(),
            stats: self.synchronizer.stats(),
            healthy: health.healthy,
            active_faults: health.active_fault_count,
            collectors: self
                .collectors_snapshot()
                .iter()
                .map(|c| c.status())
                .collect(),
            generated_at: self.clock.now(),
        }
    }

    /// 스냅샷 구독.
    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Arc<SynchronizedSnapshot>> {
        self.synchronizer.subscribe()
    }

    /// Fault 이벤트 구독.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<FaultEvent> {
        self.recovery.subscribe()
    }

    /// Fault 보고서.
    pub fn fault_report(&self) -> FaultReport {
        self.recovery.report_summary()
    }

    /// 복구 엔진 핸들.
    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// 시리즈 수집기.
    pub fn collector(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<SeriesCollector>> {
        self.collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&SeriesKey::new(symbol, timeframe))
            .cloned()
    }

    fn collectors_snapshot(&self) -> Vec<Arc<SeriesCollector>> {
        self.collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn spawn_collector(&self, collector: &Arc<SeriesCollector>) {
        let collector = Arc::clone(collector);
        let cancel = self.cancel.clone();
        self.tracker.spawn(collector.run(cancel));
    }
}

impl Drop for MtfEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
