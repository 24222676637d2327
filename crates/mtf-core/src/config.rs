//! 설정 관리.
//!
//! 컴포넌트별 타입 설정을 정의합니다. 실행 중 변경은 `ConfigDelta`를 통해서만
//! 가능하며, 변경분은 사본에 적용하고 검증을 통과한 경우에만 반영됩니다.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::types::Timeframe;

/// 전체 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 추적할 심볼
    pub symbols: Vec<String>,
    /// 수집할 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 컬렉터 설정
    pub collector: CollectorSettings,
    /// 동기화 설정
    pub synchronizer: SynchronizerSettings,
    /// 복구/헬스 설정
    pub recovery: RecoverySettings,
    /// 엔진 생명주기 설정
    pub engine: EngineSettings,
    /// 로깅 설정
    pub logging: LoggingSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["EURUSD".to_string()],
            timeframes: Timeframe::DEFAULT_ACTIVE.to_vec(),
            collector: CollectorSettings::default(),
            synchronizer: SynchronizerSettings::default(),
            recovery: RecoverySettings::default(),
            engine: EngineSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// 시리즈 컬렉터 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// 폴링 주기 (밀리초, 최소 1000)
    pub poll_interval_ms: u64,
    /// 업스트림 조회 타임아웃 (밀리초)
    pub fetch_timeout_ms: u64,
    /// 시리즈별 링 버퍼 용량
    pub history_capacity: usize,
    /// 기대 지표 개수 (미달 시 품질 감점)
    pub expected_indicators: usize,
    /// 기본 스프레드 상한
    pub default_spread_ceiling: f64,
    /// 심볼별 스프레드 상한
    pub spread_ceilings: HashMap<String, f64>,
    /// CONNECTION으로 격상하기까지의 연속 타임아웃 횟수
    pub timeout_escalation_threshold: u32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            fetch_timeout_ms: 5000,
            history_capacity: 1000,
            expected_indicators: 5,
            default_spread_ceiling: 0.05,
            spread_ceilings: HashMap::new(),
            timeout_escalation_threshold: 3,
        }
    }
}

impl CollectorSettings {
    /// 폴링 주기.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 조회 타임아웃.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// 심볼의 스프레드 상한.
    pub fn spread_ceiling(&self, symbol: &str) -> f64 {
        self.spread_ceilings
            .get(symbol)
            .copied()
            .unwrap_or(self.default_spread_ceiling)
    }
}

/// 동기화기 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SynchronizerSettings {
    /// 동기화 주기 (밀리초)
    pub interval_ms: u64,
    /// 허용 시간 차이 (초)
    pub tolerance_secs: f64,
    /// 스냅샷 포함 최소 쌍별 품질
    pub min_sync_quality: f64,
    /// 우선순위 마스터 선택 기준 품질 (초과)
    pub master_quality: f64,
    /// 동기화 후보 기준 품질 (초과)
    pub candidate_quality: f64,
    /// 스냅샷 브로드캐스트 버퍼 크기
    pub channel_capacity: usize,
}

impl Default for SynchronizerSettings {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            tolerance_secs: 30.0,
            min_sync_quality: 0.7,
            master_quality: 0.7,
            candidate_quality: 0.5,
            channel_capacity: 64,
        }
    }
}

impl SynchronizerSettings {
    /// 동기화 주기.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// 복구 엔진 및 헬스 판정 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// 비정상 판정 연속 Fault 임계치
    pub consecutive_fault_threshold: u32,
    /// 비정상 판정 활성 Fault 수 (초과)
    pub max_active_faults: usize,
    /// 정리 주기 (밀리초)
    pub sweep_interval_ms: u64,
    /// 이력 보관 기한 (초)
    pub history_ttl_secs: u64,
    /// 이력 최대 개수
    pub history_capacity: usize,
    /// 연속 Fault 카운터 리셋 윈도우 (초)
    pub consecutive_window_secs: u64,
    /// 동시 복구 워커 상한
    pub max_concurrent_recoveries: usize,
    /// 재연결 동작 타임아웃 (밀리초)
    pub reconnect_timeout_ms: u64,
    /// 이벤트 브로드캐스트 버퍼 크기
    pub channel_capacity: usize,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            consecutive_fault_threshold: 5,
            max_active_faults: 10,
            sweep_interval_ms: 30_000,
            history_ttl_secs: 24 * 60 * 60,
            history_capacity: 1000,
            consecutive_window_secs: 300,
            max_concurrent_recoveries: 4,
            reconnect_timeout_ms: 10_000,
            channel_capacity: 256,
        }
    }
}

impl RecoverySettings {
    /// 정리 주기.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// 이력 보관 기한.
    pub fn history_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.history_ttl_secs as i64)
    }

    /// 연속 Fault 윈도우.
    pub fn consecutive_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.consecutive_window_secs as i64)
    }

    /// 재연결 타임아웃.
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }
}

/// 엔진 생명주기 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// 종료 시 진행 중 워커 대기 시간 (밀리초)
    pub shutdown_grace_ms: u64,
    /// 상태 로그 출력 주기 (밀리초)
    pub status_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5000,
            status_interval_ms: 10_000,
        }
    }
}

impl EngineSettings {
    /// 종료 대기 시간.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// 상태 로그 주기.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 실행 중 변경 가능한 설정 항목.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigDelta {
    pub tolerance_secs: Option<f64>,
    pub min_sync_quality: Option<f64>,
    pub master_quality: Option<f64>,
    pub candidate_quality: Option<f64>,
    pub expected_indicators: Option<usize>,
    pub default_spread_ceiling: Option<f64>,
    /// 병합됩니다 (기존 항목 덮어쓰기)
    #[serde(default)]
    pub spread_ceilings: HashMap<String, f64>,
    pub consecutive_fault_threshold: Option<u32>,
    pub max_active_faults: Option<usize>,
}

impl ConfigDelta {
    /// 변경 항목이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        *self == ConfigDelta::default()
    }
}

impl SyncConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    ///
    /// 환경 변수는 `MTF__SECTION__KEY` 형식이며 파일 값을 덮어씁니다.
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("MTF")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("symbols")
                .with_list_parse_key("timeframes")
                .try_parsing(true),
        );

        let config: SyncConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> SyncResult<()> {
        if self.symbols.is_empty() {
            return Err(invalid("symbols must not be empty"));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("symbols must not contain blank entries"));
        }
        if self.timeframes.is_empty() {
            return Err(invalid("timeframes must not be empty"));
        }
        let unique: BTreeSet<_> = self.timeframes.iter().collect();
        if unique.len() != self.timeframes.len() {
            return Err(invalid("timeframes must not contain duplicates"));
        }

        let c = &self.collector;
        if c.poll_interval_ms < 1000 {
            return Err(invalid("collector.poll_interval_ms must be >= 1000"));
        }
        if c.fetch_timeout_ms == 0 {
            return Err(invalid("collector.fetch_timeout_ms must be > 0"));
        }
        if c.history_capacity == 0 {
            return Err(invalid("collector.history_capacity must be > 0"));
        }
        if c.expected_indicators == 0 {
            return Err(invalid("collector.expected_indicators must be > 0"));
        }
        if !(c.default_spread_ceiling > 0.0) {
            return Err(invalid("collector.default_spread_ceiling must be > 0"));
        }
        if let Some((symbol, _)) = c.spread_ceilings.iter().find(|(_, v)| !(**v > 0.0)) {
            return Err(SyncError::Config(format!(
                "collector.spread_ceilings.{} must be > 0",
                symbol
            )));
        }
        if c.timeout_escalation_threshold == 0 {
            return Err(invalid("collector.timeout_escalation_threshold must be > 0"));
        }

        let s = &self.synchronizer;
        if s.interval_ms == 0 {
            return Err(invalid("synchronizer.interval_ms must be > 0"));
        }
        if !(s.tolerance_secs > 0.0) {
            return Err(invalid("synchronizer.tolerance_secs must be > 0"));
        }
        for (name, value) in [
            ("min_sync_quality", s.min_sync_quality),
            ("master_quality", s.master_quality),
            ("candidate_quality", s.candidate_quality),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SyncError::Config(format!(
                    "synchronizer.{} must be within [0, 1]",
                    name
                )));
            }
        }
        if s.channel_capacity == 0 {
            return Err(invalid("synchronizer.channel_capacity must be > 0"));
        }

        let r = &self.recovery;
        if r.consecutive_fault_threshold == 0 {
            return Err(invalid("recovery.consecutive_fault_threshold must be > 0"));
        }
        if r.sweep_interval_ms == 0 {
            return Err(invalid("recovery.sweep_interval_ms must be > 0"));
        }
        if r.history_capacity == 0 {
            return Err(invalid("recovery.history_capacity must be > 0"));
        }
        if r.max_concurrent_recoveries == 0 {
            return Err(invalid("recovery.max_concurrent_recoveries must be > 0"));
        }
        if r.reconnect_timeout_ms == 0 {
            return Err(invalid("recovery.reconnect_timeout_ms must be > 0"));
        }
        if r.channel_capacity == 0 {
            return Err(invalid("recovery.channel_capacity must be > 0"));
        }

        if self.engine.status_interval_ms == 0 {
            return Err(invalid("engine.status_interval_ms must be > 0"));
        }

        Ok(())
    }

    /// 변경분을 적용합니다. 검증에 실패하면 기존 설정은 그대로 유지됩니다.
    pub fn apply_delta(&mut self, delta: &ConfigDelta) -> SyncResult<()> {
        let mut next = self.clone();

        if let Some(v) = delta.tolerance_secs {
            next.synchronizer.tolerance_secs = v;
        }
        if let Some(v) = delta.min_sync_quality {
            next.synchronizer.min_sync_quality = v;
        }
        if let Some(v) = delta.master_quality {
            next.synchronizer.master_quality = v;
        }
        if let Some(v) = delta.candidate_quality {
            next.synchronizer.candidate_quality = v;
        }
        if let Some(v) = delta.expected_indicators {
            next.collector.expected_indicators = v;
        }
        if let Some(v) = delta.default_spread_ceiling {
            next.collector.default_spread_ceiling = v;
        }
        next.collector
            .spread_ceilings
            .extend(delta.spread_ceilings.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(v) = delta.consecutive_fault_threshold {
            next.recovery.consecutive_fault_threshold = v;
        }
        if let Some(v) = delta.max_active_faults {
            next.recovery.max_active_faults = v;
        }

        next.validate()?;
        *self = next;
        Ok(())
    }
}

fn invalid(msg: &str) -> SyncError {
    SyncError::Config(msg.to_string())
}
