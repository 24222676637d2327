//! 수집기 쪽 복구 동작 구현.
//!
//! Fault 컨텍스트의 `symbol`/`timeframe`으로 대상 수집기를 찾습니다.
//! 수집기 목록은 약한 참조로 들고 있어 엔진과 순환 참조를 만들지 않습니다.

use async_trait::async_trait;
use mtf_core::{SeriesKey, Timeframe};
use mtf_recovery::{Fault, RecoveryAction, RecoveryError, RecoveryHandler, RecoveryResult};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::info;

use crate::collector::SeriesCollector;
use crate::source::MarketDataSource;

/// 등록된 수집기 목록.
pub type CollectorMap = RwLock<BTreeMap<SeriesKey, Arc<SeriesCollector>>>;

pub struct CollectorRecoveryHandler {
    collectors: Weak<CollectorMap>,
    source: Arc<dyn MarketDataSource>,
}

impl CollectorRecoveryHandler {
    pub fn new(collectors: &Arc<CollectorMap>, source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            collectors: Arc::downgrade(collectors),
            source,
        }
    }

    fn series_of(fault: &Fault) -> Option<SeriesKey> {
        let symbol = fault.context_value("symbol")?;
        let timeframe: Timeframe = fault.context_value("timeframe")?.parse().ok()?;
        Some(SeriesKey::new(symbol, timeframe))
    }

    fn collectors(&self) -> RecoveryResult<Arc<CollectorMap>> {
        self.collectors
            .upgrade()
            .ok_or_else(|| RecoveryError::ActionFailed("엔진이 종료되었습니다".into()))
    }

    /// Fault 대상 수집기. 시리즈 컨텍스트가 없으면 `None`.
    fn target(&self, fault: &Fault) -> RecoveryResult<Option<Arc<SeriesCollector>>> {
        let Some(key) = Self::series_of(fault) else {
            return Ok(None);
        };
        let collectors = self.collectors()?;
        let map = collectors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(&key).cloned())
    }
}

#[async_trait]
impl RecoveryHandler for CollectorRecoveryHandler {
    async fn retry(&self, fault: &Fault) -> RecoveryResult<()> {
        let collector = self.target(fault)?.ok_or_else(|| {
            RecoveryError::not_applicable(RecoveryAction::Retry, "시리즈 컨텍스트 없음")
        })?;
        let outcome = collector
            .collect()
            .await
            .map_err(|e| RecoveryError::ActionFailed(e.to_string()))?;
        info!(series = %collector.key(), outcome = ?outcome, "재조회 성공");
        Ok(())
    }

    async fn reconnect(&self, _fault: &Fault) -> RecoveryResult<()> {
        self.source
            .reconnect()
            .await
            .map_err(|e| RecoveryError::ActionFailed(e.to_string()))?;
        info!(source = self.source.name(), "업스트림 재연결 완료");
        Ok(())
    }

    async fn reset(&self, fault: &Fault) -> RecoveryResult<()> {
        match self.target(fault)? {
            Some(collector) => collector.reset(),
            None => {
                let collectors = self.collectors()?;
                let all: Vec<Arc<SeriesCollector>> = collectors
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect();
                for collector in all {
                    collector.reset();
                }
            }
        }
        Ok(())
    }
}
