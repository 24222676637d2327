//! 사람이 읽는 Fault 보고서.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::fault::{FaultKind, FaultSummary};
use crate::health::HealthReport;

/// 보고서의 최근 Fault 표시 수.
const REPORT_RECENT_LIMIT: usize = 5;

/// Fault 보고서.
#[derive(Debug, Clone, Serialize)]
pub struct FaultReport {
    pub generated_at: DateTime<Utc>,
    pub health: HealthReport,
    /// 종류별 활성 Fault 수 (0 제외)
    pub active_by_kind: Vec<(FaultKind, usize)>,
    /// 활성 Fault (오래된 순)
    pub active: Vec<FaultSummary>,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.health;
        writeln!(f, "=== Fault 보고서 ({}) ===", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "상태: {}", if h.healthy { "HEALTHY" } else { "UNHEALTHY" })?;
        writeln!(
            f,
            "전체 {} / 해결 {} / 에스컬레이션 {} / 활성 {}",
            h.total_faults, h.resolved_faults, h.escalated_faults, h.active_fault_count
        )?;
        writeln!(
            f,
            "가동률: {:.2}%, 연속 Fault: {}",
            h.uptime_percentage, h.consecutive_fault_count
        )?;

        if !self.active_by_kind.is_empty() {
            writeln!(f, "종류별 활성:")?;
            for (kind, count) in &self.active_by_kind {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }

        if !self.active.is_empty() {
            writeln!(f, "활성 Fault:")?;
            for fault in &self.active {
                writeln!(
                    f,
                    "  [{}] {} {} (시도 {}회, {:?}): {}",
                    fault.severity, fault.kind, fault.id, fault.retry_count, fault.status, fault.message
                )?;
            }
        }

        if !h.recent_faults.is_empty() {
            writeln!(f, "최근 Fault:")?;
            for fault in h.recent_faults.iter().take(REPORT_RECENT_LIMIT) {
                writeln!(
                    f,
                    "  {} [{}] {}: {}",
                    fault.created_at.format("%H:%M:%S"),
                    fault.severity,
                    fault.kind,
                    fault.message
                )?;
            }
        }
        Ok(())
    }
}
