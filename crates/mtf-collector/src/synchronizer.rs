//! 멀티 타임프레임 동기화기.
//!
//! 고정 주기마다 심볼별로 게시된 샘플을 읽어 마스터 시리즈를 고르고,
//! 마스터와의 쌍별 동기화 품질이 하한 이상인 시리즈만 묶어 스냅샷을 게시합니다.
//! 수집기를 막지 않으며 이미 게시된 샘플만 읽습니다.

use chrono::{DateTime, Utc};
use mtf_core::{
    Sample, SharedClock, SynchronizedSnapshot, SynchronizerSettings, Ticker, Timeframe,
};
use mtf_recovery::{FaultId, FaultKind, FaultSeverity, NewFault, RecoveryEngine};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::live_config::LiveConfig;
use crate::stats::SyncStats;
use crate::store::SeriesStore;

/// 스냅샷을 만들지 못한 이유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 게시된 샘플 없음
    NoSamples,
    /// 모든 샘플이 타임프레임 주기의 2배보다 오래됨
    AllStale,
    /// 마스터 후보 품질 미달
    NoMaster,
    /// 마스터 자체 품질이 하한 미달
    MasterBelowFloor,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoSamples => "게시된 샘플 없음",
            SkipReason::AllStale => "모든 샘플이 오래됨",
            SkipReason::NoMaster => "마스터 후보 없음",
            SkipReason::MasterBelowFloor => "마스터 품질이 하한 미달",
        };
        f.write_str(s)
    }
}

/// 마스터 시리즈를 선택합니다.
///
/// 가장 세밀한 타임프레임부터 `master_quality` 초과인 시리즈를 찾고,
/// 없으면 `candidate_quality` 초과인 아무 시리즈나 선택합니다.
pub fn select_master(
    samples: &BTreeMap<Timeframe, Arc<Sample>>,
    settings: &SynchronizerSettings,
) -> Option<Timeframe> {
    samples
        .iter()
        .find(|(_, s)| s.quality_score > settings.master_quality)
        .or_else(|| {
            samples
                .iter()
                .find(|(_, s)| s.quality_score > settings.candidate_quality)
        })
        .map(|(tf, _)| *tf)
}

/// 두 샘플 시각 차이(초).
pub fn time_offset_secs(master: &Sample, other: &Sample) -> f64 {
    (other.timestamp - master.timestamp).num_milliseconds().abs() as f64 / 1000.0
}

/// 마스터 대비 쌍별 동기화 품질.
///
/// 허용 범위를 넘는 시각 차이에 선형 감점, 두 샘플 품질 평균을 곱한 뒤,
/// 마스터보다 거친 타임프레임에는 최대 2배까지 여유를 줍니다.
pub fn pairwise_quality(master: &Sample, other: &Sample, tolerance_secs: f64) -> f64 {
    let offset = time_offset_secs(master, other);
    let mut quality = 1.0;
    if offset > tolerance_secs {
        quality -= (offset - tolerance_secs) / tolerance_secs;
    }

    quality *= (master.quality_score + other.quality_score) / 2.0;

    if other.timeframe > master.timeframe {
        let factor = other.timeframe.ratio_to(master.timeframe).min(2.0);
        quality = (quality + (1.0 - quality) * (factor - 1.0) / factor).min(1.0);
    }

    if quality.is_nan() {
        0.0
    } else {
        quality.max(0.0)
    }
}

/// 심볼의 샘플로 스냅샷을 구성합니다.
///
/// `now` 기준으로 오래된 샘플은 마스터나 후보가 될 수 없습니다.
pub fn build_snapshot(
    symbol: &str,
    samples: &BTreeMap<Timeframe, Arc<Sample>>,
    settings: &SynchronizerSettings,
    now: DateTime<Utc>,
) -> Result<SynchronizedSnapshot, SkipReason> {
    if samples.is_empty() {
        return Err(SkipReason::NoSamples);
    }

    let samples: BTreeMap<Timeframe, Arc<Sample>> = samples
        .iter()
        .filter(|(tf, sample)| {
            let stale = sample.is_stale(now);
            if stale {
                debug!(
                    symbol,
                    timeframe = %tf,
                    age_secs = sample.age_secs(now),
                    "오래된 샘플 제외"
                );
            }
            !stale
        })
        .map(|(tf, sample)| (*tf, Arc::clone(sample)))
        .collect();
    if samples.is_empty() {
        return Err(SkipReason::AllStale);
    }
    let samples = &samples;

    let master_tf = select_master(samples, settings).ok_or(SkipReason::NoMaster)?;
    let master = samples
        .get(&master_tf)
        .ok_or(SkipReason::NoMaster)?;

    if master.quality_score < settings.min_sync_quality {
        return Err(SkipReason::MasterBelowFloor);
    }

    let mut timeframes = BTreeMap::new();
    let mut lag = BTreeMap::new();
    let mut pairwise = Vec::new();

    timeframes.insert(master_tf, master.synchronized_copy(now));
    lag.insert(master_tf, 0.0);

    for (tf, sample) in samples {
        if *tf == master_tf || !(sample.quality_score > settings.candidate_quality) {
            continue;
        }
        let quality = pairwise_quality(master, sample, settings.tolerance_secs);
        if quality >= settings.min_sync_quality {
            timeframes.insert(*tf, sample.synchronized_copy(now));
            lag.insert(*tf, time_offset_secs(master, sample));
            pairwise.push(quality);
        } else {
            debug!(
                symbol,
                timeframe = %tf,
                quality,
                "동기화 품질 미달로 제외"
            );
        }
    }

    let sync_quality = if pairwise.is_empty() {
        master.quality_score
    } else {
        pairwise.iter().sum::<f64>() / pairwise.len() as f64
    };

    Ok(SynchronizedSnapshot {
        symbol: symbol.to_string(),
        master_timeframe: master_tf,
        master_timestamp: master.timestamp,
        timeframes,
        sync_quality,
        lag,
        created_at: now,
    })
}

/// 스냅샷 게시자.
pub struct Synchronizer {
    store: Arc<SeriesStore>,
    config: Arc<LiveConfig>,
    clock: SharedClock,
    recovery: RecoveryEngine,
    snapshots: RwLock<HashMap<String, Arc<SynchronizedSnapshot>>>,
    stats: Mutex<SyncStats>,
    failing: Mutex<HashMap<String, FaultId>>,
    events: broadcast::Sender<Arc<SynchronizedSnapshot>>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<SeriesStore>,
        config: Arc<LiveConfig>,
        clock: SharedClock,
        recovery: RecoveryEngine,
    ) -> Self {
        let capacity = config.get().synchronizer.channel_capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        Self {
            store,
            config,
            clock,
            recovery,
            snapshots: RwLock::new(HashMap::new()),
            stats: Mutex::new(SyncStats::new()),
            failing: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// 스냅샷 구독.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SynchronizedSnapshot>> {
        self.events.subscribe()
    }

    /// 심볼의 마지막 스냅샷.
    pub fn snapshot(&self, symbol: &str) -> Option<Arc<SynchronizedSnapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    /// 스냅샷이 있는 심볼 수.
    pub fn synchronized_symbols(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 현재 통계.
    pub fn stats(&self) -> SyncStats {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
        stats.data_points_collected = self.store.data_points_collected();
        stats
    }

    /// 한 심볼을 동기화합니다. 실패하면 이전 스냅샷이 유지됩니다.
    pub fn sync_symbol(&self, symbol: &str) -> Result<Arc<SynchronizedSnapshot>, SkipReason> {
        let config = self.config.get();
        let settings = &config.synchronizer;
        let samples = self.store.latest_for_symbol(symbol);
        let now = self.clock.now();

        match build_snapshot(symbol, &samples, settings, now) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.snapshots
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(symbol.to_string(), Arc::clone(&snapshot));

                {
                    let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
                    stats.total_syncs += 1;
                    if snapshot.sync_quality >= settings.min_sync_quality {
                        stats.successful_syncs += 1;
                    } else {
                        stats.failed_syncs += 1;
                    }
                    stats.last_sync_time = Some(now);
                }

                self.clear_failure(symbol);
                let _ = self.events.send(Arc::clone(&snapshot));
                debug!(
                    symbol,
                    master = %snapshot.master_timeframe,
                    included = snapshot.timeframes.len(),
                    sync_quality = snapshot.sync_quality,
                    "스냅샷 게시"
                );
                Ok(snapshot)
            }
            Err(SkipReason::NoSamples) => {
                self.stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .skipped_symbols += 1;
                Err(SkipReason::NoSamples)
            }
            Err(reason) => {
                self.stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .failed_syncs += 1;
                self.record_failure(symbol, &samples, reason);
                Err(reason)
            }
        }
    }

    /// 등록된 모든 심볼을 한 번 동기화합니다. 게시된 스냅샷 수를 반환합니다.
    pub fn sync_all(&self) -> usize {
        let started = tokio::time::Instant::now();
        let published = self
            .store
            .symbols()
            .iter()
            .filter(|symbol| self.sync_symbol(symbol).is_ok())
            .count();
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_cycle(started.elapsed());
        published
    }

    /// 종료 신호까지 고정 주기로 동기화합니다.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = Ticker::new("synchronizer", self.config.get().synchronizer.interval());
        info!(interval = ?ticker.period(), "동기화 루프 시작");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sync_all();
                }
            }
        }
        info!(skipped_ticks = ticker.skipped(), "동기화 루프 종료");
    }

    fn record_failure(
        &self,
        symbol: &str,
        samples: &BTreeMap<Timeframe, Arc<Sample>>,
        reason: SkipReason,
    ) {
        let mut failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains_key(symbol) {
            debug!(symbol, %reason, "동기화 건너뜀 (보고된 Fault 유지 중)");
            return;
        }

        let best = samples
            .values()
            .map(|s| s.quality_score)
            .fold(0.0_f64, f64::max);
        warn!(symbol, %reason, best_quality = best, "스냅샷 생성 불가, 이전 스냅샷 유지");

        let id = self.recovery.report(
            NewFault::new(FaultKind::Data, format!("{} 동기화 실패: {}", symbol, reason))
                .severity(FaultSeverity::Low)
                .with_context("symbol", symbol)
                .with_context("component", "synchronizer")
                .with_context("best_quality", format!("{:.3}", best)),
        );
        failing.insert(symbol.to_string(), id);
    }

    fn clear_failure(&self, symbol: &str) {
        let id = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(symbol);
        if let Some(id) = id {
            self.recovery.resolve_fault(id, "동기화 재개");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mtf_core::{Bar, MarketBar, Tick};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample(tf: Timeframe, offset_secs: i64, quality: f64) -> Arc<Sample> {
        Arc::new(
            Sample::from_market_bar(
                "EURUSD",
                tf,
                MarketBar {
                    bar: Bar {
                        open_time: base() + Duration::seconds(offset_secs),
                        open: 1.1,
                        high: 1.1,
                        low: 1.1,
                        close: 1.1,
                        volume: 1.0,
                    },
                    tick: Tick {
                        bid: 1.1,
                        ask: 1.1001,
                    },
                },
                BTreeMap::new(),
            )
            .with_quality(quality),
        )
    }

    fn settings() -> SynchronizerSettings {
        SynchronizerSettings::default()
    }

    #[test]
    fn test_master_prefers_finest_good_series() {
        let samples: BTreeMap<_, _> = [
            (Timeframe::M1, sample(Timeframe::M1, 0, 0.6)),
            (Timeframe::M5, sample(Timeframe::M5, 0, 0.9)),
            (Timeframe::H1, sample(Timeframe::H1, 0, 0.95)),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_master(&samples, &settings()), Some(Timeframe::M5));
    }

    #[test]
    fn test_master_falls_back_to_candidate() {
        let samples: BTreeMap<_, _> = [
            (Timeframe::M1, sample(Timeframe::M1, 0, 0.3)),
            (Timeframe::H1, sample(Timeframe::H1, 0, 0.6)),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_master(&samples, &settings()), Some(Timeframe::H1));
    }

    #[test]
    fn test_no_master_when_all_poor() {
        let samples: BTreeMap<_, _> = [(Timeframe::M1, sample(Timeframe::M1, 0, 0.5))]
            .into_iter()
            .collect();
        assert_eq!(
            build_snapshot("EURUSD", &samples, &settings(), base()),
            Err(SkipReason::NoMaster)
        );
        assert_eq!(
            build_snapshot("EURUSD", &BTreeMap::new(), &settings(), base()),
            Err(SkipReason::NoSamples)
        );
    }

    #[test]
    fn test_fallback_master_below_floor_skips() {
        let samples: BTreeMap<_, _> = [(Timeframe::M1, sample(Timeframe::M1, 0, 0.6))]
            .into_iter()
            .collect();
        assert_eq!(
            build_snapshot("EURUSD", &samples, &settings(), base()),
            Err(SkipReason::MasterBelowFloor)
        );
    }

    #[test]
    fn test_stale_series_never_joins_snapshot() {
        let samples: BTreeMap<_, _> = [
            (Timeframe::M1, sample(Timeframe::M1, -121, 0.99)),
            (Timeframe::M5, sample(Timeframe::M5, 0, 0.9)),
        ]
        .into_iter()
        .collect();
        let snapshot = build_snapshot("EURUSD", &samples, &settings(), base()).unwrap();
        assert_eq!(snapshot.master_timeframe, Timeframe::M5);
        assert!(snapshot.get(Timeframe::M1).is_none());

        let later = base() + Duration::hours(24);
        assert_eq!(
            build_snapshot("EURUSD", &samples, &settings(), later),
            Err(SkipReason::AllStale)
        );
    }

    #[test]
    fn test_single_series_uses_own_quality() {
        let samples: BTreeMap<_, _> = [(Timeframe::M5, sample(Timeframe::M5, 0, 0.85))]
            .into_iter()
            .collect();
        let snapshot = build_snapshot("EURUSD", &samples, &settings(), base()).unwrap();
        assert_eq!(snapshot.master_timeframe, Timeframe::M5);
        assert!((snapshot.sync_quality - 0.85).abs() < 1e-12);
        assert!(snapshot.get(Timeframe::M5).unwrap().synchronized);
    }

    #[test]
    fn test_pairwise_quality_aligned_same_timeframe() {
        let a = sample(Timeframe::M1, 0, 0.9);
        let b = sample(Timeframe::M1, 10, 0.7);
        assert!((pairwise_quality(&a, &b, 30.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_quality_offset_penalty() {
        let a = sample(Timeframe::M1, 0, 1.0);
        let b = sample(Timeframe::M1, 45, 1.0);
        // 1 - (45 - 30) / 30
        assert!((pairwise_quality(&a, &b, 30.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_quality_leniency_capped() {
        let a = sample(Timeframe::M1, 0, 0.8);
        let b = sample(Timeframe::H1, 0, 0.8);
        // 0.8 + 0.2 * (2 - 1) / 2
        assert!((pairwise_quality(&a, &b, 30.0) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_quality_never_negative() {
        let a = sample(Timeframe::M1, 0, 1.0);
        let b = sample(Timeframe::M1, 10_000, 1.0);
        assert_eq!(pairwise_quality(&a, &b, 30.0), 0.0);
    }

    fn arb_timeframe() -> impl Strategy<Value = Timeframe> {
        prop::sample::select(Timeframe::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_snapshot_respects_floor(
            entries in prop::collection::vec(
                (arb_timeframe(), -3_600i64..3_600, 0.0f64..=1.0),
                1..9,
            ),
            tolerance in 1.0f64..120.0,
            floor in 0.0f64..=1.0,
        ) {
            let samples: BTreeMap<Timeframe, Arc<Sample>> = entries
                .into_iter()
                .map(|(tf, offset, q)| (tf, sample(tf, offset, q)))
                .collect();
            let settings = SynchronizerSettings {
                tolerance_secs: tolerance,
                min_sync_quality: floor,
                ..SynchronizerSettings::default()
            };

            if let Ok(snapshot) = build_snapshot("EURUSD", &samples, &settings, base()) {
                let master = samples.get(&snapshot.master_timeframe).unwrap();
                prop_assert!(master.quality_score >= floor);
                for (tf, included) in &snapshot.timeframes {
                    prop_assert!(included.synchronized);
                    if *tf != snapshot.master_timeframe {
                        let q = pairwise_quality(master, &samples[tf], tolerance);
                        prop_assert!(q >= floor);
                    }
                }
                prop_assert!(snapshot.sync_quality >= floor - 1e-12);
            }
        }
    }
}
