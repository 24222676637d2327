//! # MTF Collector
//!
//! 멀티 타임프레임 수집/동기화 런타임.
//!
//! ## 구성 요소
//!
//! - `SeriesCollector`: (심볼, 타임프레임)별 독립 주기 수집기
//! - `SeriesStore`: 시리즈별 최신 샘플과 링 버퍼
//! - `Synchronizer`: 심볼별 타임프레임 간 스냅샷 생성기
//! - `MtfEngine`: 위 워커와 복구 엔진을 묶는 실행 엔진
//!
//! ## 데몬 실행
//!
//! ```bash
//! mtf-collector daemon --symbols EURUSD,GBPUSD
//! mtf-collector show-config
//! ```

pub mod collector;
pub mod engine;
pub mod error;
pub mod handler;
pub mod indicators;
pub mod live_config;
pub mod quality;
pub mod simulated;
pub mod source;
pub mod stats;
pub mod store;
pub mod synchronizer;

pub use collector::{CollectorStatus, SeriesCollector};
pub use engine::{EngineStatus, MtfEngine, MtfEngineBuilder};
pub use error::{CollectError, EngineError, EngineResult, IndicatorError, SourceError};
pub use handler::CollectorRecoveryHandler;
pub use indicators::{IndicatorParams, TaIndicatorCalculator};
pub use live_config::LiveConfig;
pub use quality::QualityScorer;
pub use simulated::{SimulatedFeed, SimulatedFeedConfig};
pub use source::{IndicatorCalculator, IndicatorMap, MarketDataSource};
pub use stats::SyncStats;
pub use store::{PublishOutcome, SeriesSlot, SeriesStore};
pub use synchronizer::{SkipReason, Synchronizer};
