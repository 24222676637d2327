//! Fault 종류별 복구 전략 테이블.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::fault::FaultKind;

/// 복구 동작.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryAction {
    /// 실패한 조회 재실행
    Retry,
    /// 업스트림 재연결
    Reconnect,
    /// 내부 상태 초기화
    Reset,
    /// 등록된 대체 경로 실행
    Fallback,
    /// 운영자 알림
    Escalate,
    /// 해결로 간주
    Ignore,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryAction::Retry => "RETRY",
            RecoveryAction::Reconnect => "RECONNECT",
            RecoveryAction::Reset => "RESET",
            RecoveryAction::Fallback => "FALLBACK",
            RecoveryAction::Escalate => "ESCALATE",
            RecoveryAction::Ignore => "IGNORE",
        };
        f.write_str(s)
    }
}

/// 단일 Fault 종류에 대한 복구 전략.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryStrategy {
    /// 대상 종류
    pub kind: FaultKind,
    /// 최대 시도 횟수
    pub max_retries: u32,
    /// 첫 재시도 전 대기
    pub initial_delay: Duration,
    /// 백오프 배수
    pub backoff_multiplier: f64,
    /// 순서대로 적용할 동작 목록
    pub actions: Vec<RecoveryAction>,
}

impl RecoveryStrategy {
    /// 새 전략을 생성합니다.
    pub fn new(
        kind: FaultKind,
        max_retries: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        actions: impl Into<Vec<RecoveryAction>>,
    ) -> Self {
        Self {
            kind,
            max_retries,
            initial_delay,
            backoff_multiplier,
            actions: actions.into(),
        }
    }

    /// 기본 전략.
    pub fn for_kind(kind: FaultKind) -> Self {
        use RecoveryAction::*;
        match kind {
            FaultKind::Connection => Self::new(
                kind,
                5,
                Duration::from_secs(2),
                2.0,
                [Retry, Reconnect, Fallback],
            ),
            FaultKind::Data => Self::new(kind, 3, Duration::from_secs(1), 1.5, [Retry, Ignore]),
            FaultKind::Transmission => Self::new(
                kind,
                3,
                Duration::from_millis(1500),
                2.0,
                [Retry, Reset, Fallback],
            ),
            FaultKind::Platform => Self::new(
                kind,
                3,
                Duration::from_secs(3),
                2.0,
                [Retry, Reconnect, Escalate],
            ),
            FaultKind::Network => Self::new(
                kind,
                5,
                Duration::from_secs(2),
                1.5,
                [Retry, Reconnect, Fallback],
            ),
            FaultKind::Validation => Self::new(kind, 1, Duration::ZERO, 1.0, [Ignore, Escalate]),
            FaultKind::System => {
                Self::new(kind, 2, Duration::from_secs(5), 3.0, [Reset, Escalate])
            }
        }
    }

    /// `n`번째 재시도(0부터) 전 대기 시간: `initial × multiplier^n`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }

    /// 종료 시 운영자 알림 여부.
    pub fn escalates(&self) -> bool {
        self.actions.contains(&RecoveryAction::Escalate)
    }

    /// 시도별 동작 계획.
    ///
    /// `max_retries`회의 시도를 Escalate를 제외한 동작들에 순서대로 균등 배분하고,
    /// 나머지는 앞쪽 동작이 가져갑니다.
    /// CONNECTION(5회, Retry/Reconnect/Fallback)은 `[Retry, Retry, Reconnect, Reconnect, Fallback]`.
    pub fn attempt_plan(&self) -> Vec<RecoveryAction> {
        let corrective: Vec<RecoveryAction> = self
            .actions
            .iter()
            .copied()
            .filter(|a| *a != RecoveryAction::Escalate)
            .collect();
        if corrective.is_empty() {
            return Vec::new();
        }

        let total = self.max_retries as usize;
        let base = total / corrective.len();
        let remainder = total % corrective.len();

        let mut plan = Vec::with_capacity(total);
        for (i, action) in corrective.iter().enumerate() {
            let count = base + usize::from(i < remainder);
            plan.extend(std::iter::repeat(*action).take(count));
        }
        plan
    }
}

/// 종류별 전략 테이블. 모든 `FaultKind`에 대해 항상 정의되어 있습니다.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: Vec<RecoveryStrategy>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl StrategyTable {
    /// 기본 테이블.
    pub fn standard() -> Self {
        Self {
            strategies: FaultKind::ALL
                .iter()
                .map(|kind| RecoveryStrategy::for_kind(*kind))
                .collect(),
        }
    }

    /// 특정 종류의 전략을 교체합니다.
    pub fn with(mut self, strategy: RecoveryStrategy) -> Self {
        let index = strategy.kind.index();
        self.strategies[index] = strategy;
        self
    }

    /// 전략 조회.
    pub fn get(&self, kind: FaultKind) -> &RecoveryStrategy {
        &self.strategies[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecoveryAction::*;

    #[test]
    fn test_connection_plan() {
        let strategy = RecoveryStrategy::for_kind(FaultKind::Connection);
        assert_eq!(
            strategy.attempt_plan(),
            vec![Retry, Retry, Reconnect, Reconnect, Fallback]
        );
        assert!(!strategy.escalates());
    }

    #[test]
    fn test_plans_for_standard_table() {
        let table = StrategyTable::standard();
        assert_eq!(table.get(FaultKind::Data).attempt_plan(), vec![Retry, Retry, Ignore]);
        assert_eq!(
            table.get(FaultKind::Transmission).attempt_plan(),
            vec![Retry, Reset, Fallback]
        );
        assert_eq!(
            table.get(FaultKind::Platform).attempt_plan(),
            vec![Retry, Retry, Reconnect]
        );
        assert_eq!(table.get(FaultKind::System).attempt_plan(), vec![Reset, Reset]);
        assert_eq!(table.get(FaultKind::Validation).attempt_plan(), vec![Ignore]);
        assert_eq!(table.get(FaultKind::Network).attempt_plan().len(), 5);
        assert!(table.get(FaultKind::Platform).escalates());
        assert!(table.get(FaultKind::System).escalates());
        assert!(!table.get(FaultKind::Transmission).escalates());
    }

    #[test]
    fn test_backoff_delays() {
        let strategy = RecoveryStrategy::for_kind(FaultKind::Connection);
        assert_eq!(strategy.delay_for(0), Duration::from_secs(2));
        assert_eq!(strategy.delay_for(1), Duration::from_secs(4));
        assert_eq!(strategy.delay_for(3), Duration::from_secs(16));

        let data = RecoveryStrategy::for_kind(FaultKind::Data);
        assert_eq!(data.delay_for(1), Duration::from_millis(1500));

        let system = RecoveryStrategy::for_kind(FaultKind::System);
        assert_eq!(system.delay_for(1), Duration::from_secs(15));
    }

    #[test]
    fn test_plan_shorter_than_actions() {
        let strategy = RecoveryStrategy::new(
            FaultKind::Network,
            2,
            Duration::from_millis(10),
            1.0,
            [Retry, Reconnect, Fallback],
        );
        assert_eq!(strategy.attempt_plan(), vec![Retry, Reconnect]);
    }

    #[test]
    fn test_table_override() {
        let table = StrategyTable::standard().with(RecoveryStrategy::new(
            FaultKind::Data,
            1,
            Duration::ZERO,
            1.0,
            [Ignore],
        ));
        assert_eq!(table.get(FaultKind::Data).max_retries, 1);
        assert_eq!(table.get(FaultKind::Connection).max_retries, 5);
    }
}
