//! 시각 및 주기 추상화.
//!
//! - `Clock` - 벽시계 시각 (샘플 나이, Fault 보관 기한 계산용)
//! - `Ticker` - 워커별 고정 주기 스케줄러
//!
//! 주기는 tokio 타이머를 따르므로 `start_paused` 테스트에서 가상 시간으로 진행되고,
//! 벽시계 로직은 `ManualClock`으로 대체할 수 있습니다.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// 벽시계 시각 공급자.
pub trait Clock: Send + Sync + fmt::Debug {
    /// 현재 시각.
    fn now(&self) -> DateTime<Utc>;
}

/// 공유 가능한 시계 핸들.
pub type SharedClock = Arc<dyn Clock>;

/// 시스템 시계.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl SystemClock {
    /// 공유 핸들로 생성합니다.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

/// 수동으로 진행시키는 시계.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// 주어진 시각에서 시작합니다.
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: RwLock::new(start),
        })
    }

    /// 시각을 앞으로 진행합니다.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    /// 시각을 지정합니다.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|p| p.into_inner())
    }
}

/// 고정 주기 스케줄러.
///
/// 이전 주기가 늦게 끝나면 밀린 틱을 몰아서 실행하지 않고 건너뜁니다.
pub struct Ticker {
    name: &'static str,
    period: Duration,
    interval: Interval,
    last_tick: Option<Instant>,
    skipped: u64,
}

impl Ticker {
    /// 첫 틱이 즉시 발생하는 스케줄러를 생성합니다.
    pub fn new(name: &'static str, period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            name,
            period,
            interval,
            last_tick: None,
            skipped: 0,
        }
    }

    /// 다음 틱까지 대기합니다.
    pub async fn tick(&mut self) -> Instant {
        let at = self.interval.tick().await;
        if let Some(prev) = self.last_tick {
            let missed = (at.duration_since(prev).as_nanos() / self.period.as_nanos().max(1))
                .saturating_sub(1) as u64;
            if missed > 0 {
                self.skipped += missed;
                tracing::debug!(ticker = self.name, missed, "이전 주기가 지연되어 틱을 건너뜀");
            }
        }
        self.last_tick = Some(at);
        at
    }

    /// 스케줄러 이름.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 주기.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// 지금까지 건너뛴 틱 수.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("skipped", &self.skipped)
            .finish()
    }
}
