//! Fault 저장소.
//!
//! 활성 Fault 맵과 보관 기한이 있는 이력, 누적 카운터를 보관합니다.
//! 잠금은 호출하는 엔진이 담당합니다.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::fault::{Fault, FaultId, FaultKind, FaultSeverity, FaultStatus};
use crate::health::{uptime_percentage, HealthPolicy, HealthReport, RECENT_FAULT_LIMIT};

#[derive(Debug)]
pub(crate) struct FaultRegistry {
    active: HashMap<FaultId, Fault>,
    history: VecDeque<Fault>,
    capacity: usize,
    total: u64,
    resolved: u64,
    escalated: u64,
    consecutive: u32,
    last_fault_at: Option<DateTime<Utc>>,
}

impl FaultRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
            resolved: 0,
            escalated: 0,
            consecutive: 0,
            last_fault_at: None,
        }
    }

    pub(crate) fn insert(&mut self, fault: Fault) {
        self.total += 1;
        self.consecutive = self.consecutive.saturating_add(1);
        self.last_fault_at = Some(fault.created_at);

        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(fault.clone());
        self.active.insert(fault.id, fault);
    }

    /// 활성 Fault를 해결합니다. 이미 해결되었거나 없으면 `None`.
    pub(crate) fn resolve(&mut self, id: FaultId, note: &str, at: DateTime<Utc>) -> Option<Fault> {
        let mut fault = self.active.remove(&id)?;
        fault.status = FaultStatus::Resolved;
        fault.resolved = true;
        fault.resolved_at = Some(at);
        fault.resolution = Some(note.to_string());

        self.resolved += 1;
        self.consecutive = self.consecutive.saturating_sub(1);
        self.sync_history(&fault);
        Some(fault)
    }

    /// 복구 워커가 Fault를 점유합니다. `Reported` 상태일 때만 성공합니다.
    pub(crate) fn claim(&mut self, id: FaultId) -> Option<Fault> {
        let fault = self.active.get_mut(&id)?;
        if fault.status != FaultStatus::Reported {
            return None;
        }
        fault.status = FaultStatus::Recovering;
        let claimed = fault.clone();
        self.sync_history(&claimed);
        Some(claimed)
    }

    /// 중단된 복구를 `Reported`로 되돌립니다.
    pub(crate) fn release(&mut self, id: FaultId) {
        if let Some(fault) = self.active.get_mut(&id) {
            if fault.status == FaultStatus::Recovering {
                fault.status = FaultStatus::Reported;
            }
        }
    }

    /// 시도 횟수를 기록하고 최신 상태를 반환합니다.
    pub(crate) fn record_attempt(&mut self, id: FaultId, attempt: u32) -> Option<Fault> {
        let fault = self.active.get_mut(&id)?;
        fault.retry_count = attempt;
        let current = fault.clone();
        self.sync_history(&current);
        Some(current)
    }

    /// 에스컬레이션 상태로 전환합니다. Fault는 해결될 때까지 활성으로 남습니다.
    pub(crate) fn escalate(&mut self, id: FaultId, notify: bool) -> Option<Fault> {
        let fault = self.active.get_mut(&id)?;
        fault.status = FaultStatus::Escalated;
        let escalated = fault.clone();
        if notify {
            self.escalated += 1;
        }
        self.sync_history(&escalated);
        Some(escalated)
    }

    pub(crate) fn get(&self, id: FaultId) -> Option<Fault> {
        self.active
            .get(&id)
            .cloned()
            .or_else(|| self.history.iter().rev().find(|f| f.id == id).cloned())
    }

    pub(crate) fn active(&self) -> impl Iterator<Item = &Fault> {
        self.active.values()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    /// 보관 기한이 지난 이력을 제거합니다.
    pub(crate) fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.history.len();
        self.history.retain(|f| f.created_at >= cutoff);
        before - self.history.len()
    }

    /// 일정 시간 새 Fault가 없으면 연속 카운트를 초기화합니다.
    pub(crate) fn reset_streak_if_quiet(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        let quiet = match self.last_fault_at {
            Some(last) => now - last > window,
            None => true,
        };
        if quiet && self.consecutive > 0 {
            self.consecutive = 0;
            return true;
        }
        false
    }

    /// 아직 복구가 시작되지 않은 활성 Fault.
    pub(crate) fn pending(&self) -> Vec<FaultId> {
        let mut pending: Vec<&Fault> = self
            .active
            .values()
            .filter(|f| f.status == FaultStatus::Reported)
            .collect();
        pending.sort_by_key(|f| f.created_at);
        pending.into_iter().map(|f| f.id).collect()
    }

    pub(crate) fn count_active_by_kind(&self, kind: FaultKind) -> usize {
        self.active.values().filter(|f| f.kind == kind).count()
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn evaluate(&self, policy: &HealthPolicy, now: DateTime<Utc>) -> HealthReport {
        let critical_active = self
            .active
            .values()
            .any(|f| f.severity == FaultSeverity::Critical);

        HealthReport {
            healthy: policy.is_healthy(self.consecutive, self.active.len(), critical_active),
            active_fault_count: self.active.len(),
            total_faults: self.total,
            resolved_faults: self.resolved,
            escalated_faults: self.escalated,
            uptime_percentage: uptime_percentage(self.resolved, self.total),
            consecutive_fault_count: self.consecutive,
            last_fault_at: self.last_fault_at,
            recent_faults: self
                .history
                .iter()
                .rev()
                .take(RECENT_FAULT_LIMIT)
                .map(Fault::summary)
                .collect(),
            last_check: now,
        }
    }

    fn sync_history(&mut self, fault: &Fault) {
        if let Some(entry) = self.history.iter_mut().rev().find(|f| f.id == fault.id) {
            *entry = fault.clone();
        }
    }
}
