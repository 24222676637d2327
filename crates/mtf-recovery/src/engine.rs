//! 복구 엔진.
//!
//! Fault를 기록하고, 종류별 전략에 따라 백그라운드 복구를 수행하며,
//! 주기적 스윕으로 이력 정리와 헬스 재계산을 담당합니다.
//!
//! # 동시성
//!
//! - Fault 저장소와 헬스 스냅샷은 각각 별도 잠금으로 보호됩니다.
//!   잠금 순서는 항상 저장소 → 헬스입니다.
//! - 복구 워커는 `TaskTracker`에 등록되고 세마포어로 동시 실행 수가 제한됩니다.
//! - 백오프 대기 중에는 어떤 잠금도 잡지 않습니다.

use mtf_core::{RecoverySettings, SharedClock, SystemClock, Ticker};
use serde::Serialize;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::actions::{AlertSink, FallbackRegistry, LogAlertSink, RecoveryHandler};
use crate::error::{RecoveryError, RecoveryResult};
use crate::fault::{
    Fault, FaultContext, FaultEvent, FaultId, FaultKind, FaultSeverity, NewFault,
};
use crate::health::{HealthPolicy, HealthReport};
use crate::registry::FaultRegistry;
use crate::report::FaultReport;
use crate::strategy::{RecoveryAction, RecoveryStrategy, StrategyTable};

/// 단일 복구 시도 기록.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    /// 시도 번호 (1부터)
    pub number: u32,
    pub action: RecoveryAction,
    /// 시도 전 대기 시간
    pub delay: Duration,
    pub error: Option<String>,
}

impl RecoveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 복구 종료 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// 해당 동작으로 복구됨
    Recovered(RecoveryAction),
    /// 시도 소진으로 에스컬레이션됨
    Escalated,
    /// 복구 도중 외부에서 해결됨
    ResolvedExternally,
    /// 종료 신호로 중단됨
    Cancelled,
}

/// 복구 결과.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub fault_id: FaultId,
    pub kind: FaultKind,
    pub attempts: Vec<RecoveryAttempt>,
    pub status: RecoveryStatus,
}

impl RecoveryOutcome {
    /// 시도 전 대기 시간 목록.
    pub fn delays(&self) -> Vec<Duration> {
        self.attempts.iter().map(|a| a.delay).collect()
    }

    /// 시도한 동작 목록.
    pub fn actions(&self) -> Vec<RecoveryAction> {
        self.attempts.iter().map(|a| a.action).collect()
    }
}

/// 스윕 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// 제거된 이력 수
    pub evicted: usize,
    /// 연속 카운트 초기화 여부
    pub streak_reset: bool,
    /// 복구를 시작한 Fault 수
    pub recoveries_started: usize,
}

/// 복구 엔진 빌더.
pub struct RecoveryEngineBuilder {
    settings: RecoverySettings,
    strategies: StrategyTable,
    clock: SharedClock,
    alert_sink: Arc<dyn AlertSink>,
    fallbacks: FallbackRegistry,
    handler: Option<Arc<dyn RecoveryHandler>>,
    cancel: Option<CancellationToken>,
}

impl RecoveryEngineBuilder {
    /// 전략 테이블을 지정합니다.
    pub fn strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    /// 벽시계를 지정합니다.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// 에스컬레이션 알림 수신자를 지정합니다.
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    /// 대체 경로를 등록합니다.
    pub fn fallback<F>(mut self, kind: FaultKind, handler: F) -> Self
    where
        F: Fn(&Fault) -> RecoveryResult<()> + Send + Sync + 'static,
    {
        self.fallbacks.register(kind, handler);
        self
    }

    /// 복구 핸들러를 미리 설치합니다.
    pub fn handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// 종료 신호를 외부 토큰에 연결합니다.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> RecoveryEngine {
        let now = self.clock.now();
        let (events, _) = broadcast::channel(self.settings.channel_capacity.max(1));
        let handler = OnceLock::new();
        if let Some(h) = self.handler {
            let _ = handler.set(h);
        }

        RecoveryEngine {
            inner: Arc::new(Inner {
                policy: RwLock::new(HealthPolicy {
                    consecutive_threshold: self.settings.consecutive_fault_threshold,
                    max_active_faults: self.settings.max_active_faults,
                }),
                registry: RwLock::new(FaultRegistry::new(self.settings.history_capacity)),
                health: RwLock::new(Arc::new(HealthReport::initial(now))),
                permits: Arc::new(Semaphore::new(self.settings.max_concurrent_recoveries.max(1))),
                strategies: self.strategies,
                settings: self.settings,
                clock: self.clock,
                handler,
                alert_sink: self.alert_sink,
                fallbacks: self.fallbacks,
                tracker: TaskTracker::new(),
                cancel: self.cancel.unwrap_or_default(),
                events,
            }),
        }
    }
}

struct Inner {
    settings: RecoverySettings,
    strategies: StrategyTable,
    policy: RwLock<HealthPolicy>,
    registry: RwLock<FaultRegistry>,
    health: RwLock<Arc<HealthReport>>,
    clock: SharedClock,
    handler: OnceLock<Arc<dyn RecoveryHandler>>,
    alert_sink: Arc<dyn AlertSink>,
    fallbacks: FallbackRegistry,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    events: broadcast::Sender<FaultEvent>,
}

/// Fault 레지스트리이자 복구 엔진. 복제 비용이 낮은 핸들입니다.
#[derive(Clone)]
pub struct RecoveryEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("settings", &self.inner.settings)
            .field("handler_installed", &self.inner.handler.get().is_some())
            .finish()
    }
}

impl RecoveryEngine {
    /// 빌더를 생성합니다.
    pub fn builder(settings: RecoverySettings) -> RecoveryEngineBuilder {
        RecoveryEngineBuilder {
            settings,
            strategies: StrategyTable::standard(),
            clock: SystemClock::shared(),
            alert_sink: Arc::new(LogAlertSink),
            fallbacks: FallbackRegistry::new(),
            handler: None,
            cancel: None,
        }
    }

    /// 기본 구성으로 생성합니다.
    pub fn new(settings: RecoverySettings) -> Self {
        Self::builder(settings).build()
    }

    /// 복구 핸들러를 설치합니다. 이미 설치되어 있으면 `false`.
    pub fn install_handler(&self, handler: Arc<dyn RecoveryHandler>) -> bool {
        self.inner.handler.set(handler).is_ok()
    }

    /// Fault 이벤트를 구독합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<FaultEvent> {
        self.inner.events.subscribe()
    }

    /// Fault를 보고합니다. HIGH 이상은 즉시 백그라운드 복구를 시작합니다.
    pub fn report_fault(
        &self,
        kind: FaultKind,
        message: impl Into<String>,
        context: FaultContext,
        severity: FaultSeverity,
    ) -> FaultId {
        self.report(
            NewFault::new(kind, message)
                .severity(severity)
                .with_contexts(context),
        )
    }

    /// 빌더로 구성한 Fault를 보고합니다.
    pub fn report(&self, new_fault: NewFault) -> FaultId {
        let now = self.inner.clock.now();
        let fault = new_fault.into_fault(now);
        let id = fault.id;
        let severity = fault.severity;
        let summary = fault.summary();

        match severity {
            FaultSeverity::Critical => error!(
                fault_id = %id,
                kind = %fault.kind,
                context = ?fault.context,
                "[CRITICAL FAULT] {}",
                fault.message
            ),
            FaultSeverity::High => error!(
                fault_id = %id,
                kind = %fault.kind,
                severity = %severity,
                context = ?fault.context,
                "{}",
                fault.message
            ),
            FaultSeverity::Medium => warn!(
                fault_id = %id,
                kind = %fault.kind,
                context = ?fault.context,
                "{}",
                fault.message
            ),
            FaultSeverity::Low => info!(
                fault_id = %id,
                kind = %fault.kind,
                context = ?fault.context,
                "{}",
                fault.message
            ),
        }

        {
            let mut registry = self.write_registry();
            registry.insert(fault);
            self.refresh_health(&registry);
        }
        let _ = self.inner.events.send(FaultEvent::Reported(summary));

        if severity.is_urgent() {
            self.spawn_recovery(id);
        }
        id
    }

    /// Fault를 해결로 표시합니다. 이미 해결된 ID에 대해서는 아무 일도 하지 않고 `false`.
    pub fn resolve_fault(&self, id: FaultId, note: impl Into<String>) -> bool {
        let note = note.into();
        let now = self.inner.clock.now();
        let resolved = {
            let mut registry = self.write_registry();
            let resolved = registry.resolve(id, &note, now);
            if resolved.is_some() {
                self.refresh_health(&registry);
            }
            resolved
        };

        match resolved {
            Some(fault) => {
                info!(fault_id = %id, kind = %fault.kind, retry_count = fault.retry_count, "Fault 해결: {}", note);
                let _ = self.inner.events.send(FaultEvent::Resolved { id, note });
                true
            }
            None => {
                debug!(fault_id = %id, "이미 해결되었거나 알 수 없는 Fault");
                false
            }
        }
    }

    /// Fault 조회 (활성 또는 이력).
    pub fn fault(&self, id: FaultId) -> Option<Fault> {
        self.read_registry().get(id)
    }

    /// 활성 Fault 목록 (오래된 순).
    pub fn active_faults(&self) -> Vec<Fault> {
        let mut faults: Vec<Fault> = self.read_registry().active().cloned().collect();
        faults.sort_by_key(|f| f.created_at);
        faults
    }

    /// 현재 헬스 스냅샷.
    pub fn health(&self) -> Arc<HealthReport> {
        Arc::clone(&self.inner.health.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Fault 보고서를 생성합니다.
    pub fn report_summary(&self) -> FaultReport {
        let registry = self.read_registry();
        let policy = *self.inner.policy.read().unwrap_or_else(PoisonError::into_inner);
        let now = self.inner.clock.now();

        let mut active: Vec<&Fault> = registry.active().collect();
        active.sort_by_key(|f| f.created_at);

        FaultReport {
            generated_at: now,
            health: registry.evaluate(&policy, now),
            active_by_kind: FaultKind::ALL
                .iter()
                .map(|kind| (*kind, registry.count_active_by_kind(*kind)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            active: active.into_iter().map(Fault::summary).collect(),
        }
    }

    /// 헬스 임계값을 변경하고 즉시 재판정합니다.
    pub fn set_thresholds(&self, consecutive_threshold: u32, max_active_faults: usize) {
        {
            let mut policy = self.inner.policy.write().unwrap_or_else(PoisonError::into_inner);
            policy.consecutive_threshold = consecutive_threshold;
            policy.max_active_faults = max_active_faults;
        }
        let registry = self.read_registry();
        self.refresh_health(&registry);
        info!(consecutive_threshold, max_active_faults, "헬스 임계값 변경");
    }

    /// 현재 헬스 정책.
    pub fn policy(&self) -> HealthPolicy {
        *self.inner.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 백그라운드 복구를 시작합니다. 런타임 밖이거나 종료 중이면 다음 스윕으로 미룹니다.
    pub fn spawn_recovery(&self, id: FaultId) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(fault_id = %id, "런타임 없음, 복구를 스윕으로 연기");
            return;
        }
        let engine = self.clone();
        self.inner.tracker.spawn(async move {
            engine.recover(id).await;
        });
    }

    /// 복구를 현재 태스크에서 실행합니다.
    ///
    /// 이미 다른 워커가 처리 중이거나 활성 Fault가 아니면 `None`.
    pub async fn recover(&self, id: FaultId) -> Option<RecoveryOutcome> {
        let fault = self.write_registry().claim(id)?;
        let strategy = self.inner.strategies.get(fault.kind).clone();

        let _permit = tokio::select! {
            _ = self.inner.cancel.cancelled() => {
                self.write_registry().release(id);
                return Some(Self::outcome(&fault, Vec::new(), RecoveryStatus::Cancelled));
            }
            permit = Arc::clone(&self.inner.permits).acquire_owned() => permit.ok()?,
        };

        let mut attempts = Vec::new();
        for (index, action) in strategy.attempt_plan().into_iter().enumerate() {
            let number = index as u32 + 1;
            let delay = if index == 0 {
                Duration::ZERO
            } else {
                strategy.delay_for(number - 2)
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = self.inner.cancel.cancelled() => {
                        self.write_registry().release(id);
                        return Some(Self::outcome(&fault, attempts, RecoveryStatus::Cancelled));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let Some(current) = self.write_registry().record_attempt(id, number) else {
                return Some(Self::outcome(&fault, attempts, RecoveryStatus::ResolvedExternally));
            };

            debug!(fault_id = %id, kind = %fault.kind, attempt = number, action = %action, "복구 시도");
            match self.execute(action, &current).await {
                Ok(()) => {
                    attempts.push(RecoveryAttempt {
                        number,
                        action,
                        delay,
                        error: None,
                    });
                    let status = if self.resolve_fault(id, format!("{} 동작으로 복구 (시도 {}회)", action, number)) {
                        RecoveryStatus::Recovered(action)
                    } else {
                        RecoveryStatus::ResolvedExternally
                    };
                    return Some(Self::outcome(&fault, attempts, status));
                }
                Err(e) => {
                    warn!(fault_id = %id, attempt = number, action = %action, error = %e, "복구 시도 실패");
                    attempts.push(RecoveryAttempt {
                        number,
                        action,
                        delay,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.escalate(id, &strategy).await;
        Some(Self::outcome(&fault, attempts, RecoveryStatus::Escalated))
    }

    /// 스윕을 한 번 실행합니다.
    pub fn sweep(&self) -> SweepStats {
        let now = self.inner.clock.now();
        let cutoff = now - self.inner.settings.history_ttl();
        let window = self.inner.settings.consecutive_window();

        let (evicted, streak_reset, pending) = {
            let mut registry = self.write_registry();
            let evicted = registry.evict_before(cutoff);
            let streak_reset = registry.reset_streak_if_quiet(now, window);
            let pending = registry.pending();
            self.refresh_health(&registry);
            (evicted, streak_reset, pending)
        };

        let recoveries_started = pending.len();
        for id in pending {
            self.spawn_recovery(id);
        }

        let stats = SweepStats {
            evicted,
            streak_reset,
            recoveries_started,
        };
        if evicted > 0 || streak_reset || recoveries_started > 0 {
            info!(evicted, streak_reset, recoveries_started, "Fault 스윕 완료");
        } else {
            debug!("Fault 스윕 완료 (변경 없음)");
        }
        stats
    }

    /// 종료 신호까지 주기적으로 스윕합니다.
    pub async fn run_sweeper(&self) {
        let mut ticker = Ticker::new("fault-sweep", self.inner.settings.sweep_interval());
        // 첫 틱은 즉시 발생하므로 한 주기 뒤부터 스윕
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
        debug!("Fault 스윕 종료");
    }

    /// 스윕 루프를 백그라운드로 시작합니다.
    pub fn start_sweeper(&self) {
        let engine = self.clone();
        self.inner.tracker.spawn(async move {
            engine.run_sweeper().await;
        });
    }

    /// 종료 신호를 보내고 워커가 끝나길 기다립니다. 유예 시간 내에 끝나면 `true`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = self.inner.tracker.len(), "유예 시간 내에 복구 워커가 종료되지 않음");
                false
            }
        }
    }

    /// 실행 중인 워커 수.
    pub fn running_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    async fn execute(&self, action: RecoveryAction, fault: &Fault) -> RecoveryResult<()> {
        match action {
            RecoveryAction::Retry => self.handler()?.retry(fault).await,
            RecoveryAction::Reconnect => {
                let handler = self.handler()?;
                let limit = self.inner.settings.reconnect_timeout();
                match tokio::time::timeout(limit, handler.reconnect(fault)).await {
                    Ok(result) => result,
                    Err(_) => Err(RecoveryError::Timeout(format!("재연결 {:?} 초과", limit))),
                }
            }
            RecoveryAction::Reset => self.handler()?.reset(fault).await,
            RecoveryAction::Fallback => self.inner.fallbacks.run(fault),
            RecoveryAction::Ignore => Ok(()),
            RecoveryAction::Escalate => Err(RecoveryError::not_applicable(
                action,
                "에스컬레이션은 시도 소진 후에만 실행",
            )),
        }
    }

    async fn escalate(&self, id: FaultId, strategy: &RecoveryStrategy) {
        let notify = strategy.escalates();
        let escalated = {
            let mut registry = self.write_registry();
            let escalated = registry.escalate(id, notify);
            self.refresh_health(&registry);
            escalated
        };
        let Some(fault) = escalated else {
            return;
        };

        let summary = fault.summary();
        if notify {
            error!(
                fault_id = %id,
                kind = %fault.kind,
                retry_count = fault.retry_count,
                "복구 실패, 에스컬레이션"
            );
            if let Err(e) = self.inner.alert_sink.notify(&summary).await {
                warn!(fault_id = %id, error = %e, "에스컬레이션 알림 실패");
            }
        } else {
            error!(
                fault_id = %id,
                kind = %fault.kind,
                retry_count = fault.retry_count,
                "복구 시도 소진, 알림 대상 전략 아님"
            );
        }
        let _ = self.inner.events.send(FaultEvent::Escalated(summary));
    }

    fn handler(&self) -> RecoveryResult<Arc<dyn RecoveryHandler>> {
        self.inner
            .handler
            .get()
            .cloned()
            .ok_or(RecoveryError::HandlerMissing)
    }

    fn outcome(fault: &Fault, attempts: Vec<RecoveryAttempt>, status: RecoveryStatus) -> RecoveryOutcome {
        RecoveryOutcome {
            fault_id: fault.id,
            kind: fault.kind,
            attempts,
            status,
        }
    }

    fn refresh_health(&self, registry: &FaultRegistry) {
        let policy = *self.inner.policy.read().unwrap_or_else(PoisonError::into_inner);
        let report = registry.evaluate(&policy, self.inner.clock.now());

        let mut health = self.inner.health.write().unwrap_or_else(PoisonError::into_inner);
        if health.healthy != report.healthy {
            if report.healthy {
                info!(
                    consecutive = report.consecutive_fault_count,
                    active = report.active_fault_count,
                    "시스템 상태 회복"
                );
            } else {
                warn!(
                    consecutive = report.consecutive_fault_count,
                    active = report.active_fault_count,
                    "시스템 상태 불량"
                );
            }
        }
        *health = Arc::new(report);
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, FaultRegistry> {
        self.inner.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, FaultRegistry> {
        self.inner.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}
