//! 헬스 판정.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::FaultSummary;

/// 헬스 보고서에 포함하는 최근 Fault 수.
pub const RECENT_FAULT_LIMIT: usize = 10;

/// 헬스 판정 임계값.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// 연속 Fault 임계값 (이상이면 unhealthy)
    pub consecutive_threshold: u32,
    /// 최대 활성 Fault 수 (초과하면 unhealthy)
    pub max_active_faults: usize,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            consecutive_threshold: 5,
            max_active_faults: 10,
        }
    }
}

impl HealthPolicy {
    /// 상태를 판정합니다.
    pub fn is_healthy(&self, consecutive: u32, active: usize, critical_active: bool) -> bool {
        consecutive < self.consecutive_threshold
            && !critical_active
            && active <= self.max_active_faults
    }
}

/// 헬스 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub active_fault_count: usize,
    pub total_faults: u64,
    pub resolved_faults: u64,
    pub escalated_faults: u64,
    /// 누적 해결 비율 (%). Fault가 없으면 100.
    pub uptime_percentage: f64,
    pub consecutive_fault_count: u32,
    pub last_fault_at: Option<DateTime<Utc>>,
    /// 최근 Fault (최신순, 최대 10개)
    pub recent_faults: Vec<FaultSummary>,
    pub last_check: DateTime<Utc>,
}

impl HealthReport {
    /// Fault가 한 번도 없었던 초기 상태.
    pub fn initial(at: DateTime<Utc>) -> Self {
        Self {
            healthy: true,
            active_fault_count: 0,
            total_faults: 0,
            resolved_faults: 0,
            escalated_faults: 0,
            uptime_percentage: 100.0,
            consecutive_fault_count: 0,
            last_fault_at: None,
            recent_faults: Vec::new(),
            last_check: at,
        }
    }
}

/// 해결 비율 계산.
pub fn uptime_percentage(resolved: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        resolved as f64 / total as f64 * 100.0
    }
}
