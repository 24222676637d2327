//! 시리즈별 최신 샘플과 링 버퍼 저장소.
//!
//! 각 시리즈는 자신만의 잠금을 가지며, 게시된 샘플은 `Arc`로 통째로 교체됩니다.
//! 읽는 쪽은 항상 완성된 샘플만 관찰합니다.

use mtf_core::{Sample, SeriesKey, SyncError, SyncResult, Timeframe};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// 게시 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 새 샘플로 게시됨
    Published,
    /// 같은 시각의 샘플을 갱신함 (진행 중인 바)
    Replaced,
    /// 현재 샘플보다 오래되어 버려짐
    Stale,
}

impl PublishOutcome {
    /// 저장소 상태가 바뀌었는지 확인합니다.
    pub fn is_visible(&self) -> bool {
        !matches!(self, PublishOutcome::Stale)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<Arc<Sample>>,
    history: VecDeque<Arc<Sample>>,
}

/// 단일 시리즈 저장 슬롯.
#[derive(Debug)]
pub struct SeriesSlot {
    key: SeriesKey,
    capacity: usize,
    state: RwLock<SlotState>,
    published: Arc<AtomicU64>,
}

impl SeriesSlot {
    /// 시리즈 키.
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// 샘플을 게시합니다. 현재 샘플보다 오래된 샘플은 버립니다.
    pub fn publish(&self, sample: Sample) -> PublishOutcome {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let outcome = match state.latest.as_ref().map(|s| s.timestamp) {
            Some(current) if sample.timestamp < current => {
                debug!(
                    series = %self.key,
                    current = %current,
                    incoming = %sample.timestamp,
                    "오래된 샘플 무시"
                );
                return PublishOutcome::Stale;
            }
            Some(current) if sample.timestamp == current => PublishOutcome::Replaced,
            _ => PublishOutcome::Published,
        };

        let sample = Arc::new(sample);
        if outcome == PublishOutcome::Replaced {
            state.history.pop_back();
        } else if state.history.len() >= self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(Arc::clone(&sample));
        state.latest = Some(sample);
        self.published.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// 현재 샘플.
    pub fn latest(&self) -> Option<Arc<Sample>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    /// 최신순 이력 (최대 `limit`개).
    pub fn history(&self, limit: usize) -> Vec<Arc<Sample>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// 보관 중인 이력 수.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 전체 시리즈 저장소.
#[derive(Debug)]
pub struct SeriesStore {
    capacity: usize,
    series: RwLock<BTreeMap<SeriesKey, Arc<SeriesSlot>>>,
    published: Arc<AtomicU64>,
}

impl SeriesStore {
    /// 시리즈별 이력 용량을 지정하여 생성합니다.
    pub fn new(capacity: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::Config("history_capacity는 0보다 커야 합니다".into()));
        }
        Ok(Self {
            capacity,
            series: RwLock::new(BTreeMap::new()),
            published: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 시리즈를 등록합니다. 같은 (심볼, 타임프레임)은 한 번만 등록할 수 있습니다.
    pub fn register(&self, key: SeriesKey) -> SyncResult<Arc<SeriesSlot>> {
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        if series.contains_key(&key) {
            return Err(SyncError::DuplicateSeries(key));
        }
        let slot = Arc::new(SeriesSlot {
            key: key.clone(),
            capacity: self.capacity,
            state: RwLock::new(SlotState::default()),
            published: Arc::clone(&self.published),
        });
        series.insert(key, Arc::clone(&slot));
        Ok(slot)
    }

    /// 슬롯 조회.
    pub fn slot(&self, key: &SeriesKey) -> Option<Arc<SeriesSlot>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// 시리즈의 현재 샘플.
    pub fn latest(&self, key: &SeriesKey) -> Option<Arc<Sample>> {
        self.slot(key).and_then(|slot| slot.latest())
    }

    /// 심볼의 게시된 모든 샘플 (타임프레임 순).
    pub fn latest_for_symbol(&self, symbol: &str) -> BTreeMap<Timeframe, Arc<Sample>> {
        let slots: Vec<Arc<SeriesSlot>> = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(key, _)| key.symbol == symbol)
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        slots
            .into_iter()
            .filter_map(|slot| slot.latest().map(|s| (slot.key.timeframe, s)))
            .collect()
    }

    /// 시리즈 이력 (최신순).
    pub fn history(&self, key: &SeriesKey, limit: usize) -> Vec<Arc<Sample>> {
        self.slot(key)
            .map(|slot| slot.history(limit))
            .unwrap_or_default()
    }

    /// 등록된 심볼 (중복 제거, 정렬).
    pub fn symbols(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let mut symbols: Vec<String> = series.keys().map(|k| k.symbol.clone()).collect();
        symbols.dedup();
        symbols
    }

    /// 등록된 시리즈 키.
    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// 지금까지 게시된 샘플 수.
    pub fn data_points_collected(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use mtf_core::{Bar, MarketBar, Tick};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn sample(secs: i64, close: f64) -> Sample {
        Sample::from_market_bar(
            "EURUSD",
            Timeframe::M1,
            MarketBar {
                bar: Bar {
                    open_time: at(secs),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                },
                tick: Tick {
                    bid: close,
                    ask: close + 0.0001,
                },
            },
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let store = SeriesStore::new(10).unwrap();
        let key = SeriesKey::new("EURUSD", Timeframe::M1);
        store.register(key.clone()).unwrap();
        assert!(matches!(
            store.register(key),
            Err(SyncError::DuplicateSeries(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SeriesStore::new(0).is_err());
    }

    #[test]
    fn test_older_sample_never_overwrites() {
        let store = SeriesStore::new(10).unwrap();
        let slot = store.register(SeriesKey::new("EURUSD", Timeframe::M1)).unwrap();

        assert_eq!(slot.publish(sample(120, 1.2)), PublishOutcome::Published);
        let newer = slot.latest().unwrap();

        assert_eq!(slot.publish(sample(60, 1.1)), PublishOutcome::Stale);
        let visible = slot.latest().unwrap();
        assert!(Arc::ptr_eq(&newer, &visible));
        assert_eq!(visible.close, 1.2);
        assert_eq!(slot.len(), 1);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let store = SeriesStore::new(10).unwrap();
        let slot = store.register(SeriesKey::new("EURUSD", Timeframe::M1)).unwrap();

        slot.publish(sample(60, 1.1));
        assert_eq!(slot.publish(sample(60, 1.15)), PublishOutcome::Replaced);
        assert_eq!(slot.latest().unwrap().close, 1.15);
        assert_eq!(slot.len(), 1);
        assert_eq!(store.data_points_collected(), 2);
    }

    #[test]
    fn test_ring_buffer_capacity() {
        let store = SeriesStore::new(3).unwrap();
        let key = SeriesKey::new("EURUSD", Timeframe::M1);
        let slot = store.register(key.clone()).unwrap();
        for i in 0..5 {
            slot.publish(sample(i * 60, 1.0 + i as f64));
        }

        let history = store.history(&key, 10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].close, 5.0);
        assert_eq!(history[2].close, 3.0);
    }

    #[test]
    fn test_latest_for_symbol() {
        let store = SeriesStore::new(10).unwrap();
        let m1 = store.register(SeriesKey::new("EURUSD", Timeframe::M1)).unwrap();
        store.register(SeriesKey::new("EURUSD", Timeframe::H1)).unwrap();
        store.register(SeriesKey::new("GBPUSD", Timeframe::M1)).unwrap();
        m1.publish(sample(0, 1.1));

        let latest = store.latest_for_symbol("EURUSD");
        assert_eq!(latest.len(), 1);
        assert!(latest.contains_key(&Timeframe::M1));
        assert_eq!(store.symbols(), vec!["EURUSD".to_string(), "GBPUSD".to_string()]);
    }
}
