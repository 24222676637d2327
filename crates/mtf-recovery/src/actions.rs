//! 복구 동작 실행 지점.
//!
//! 엔진은 Fault 분류와 재시도 정책만 결정하고, 실제 재조회/재연결/초기화는
//! 상위 계층이 설치한 `RecoveryHandler`가 수행합니다.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::error;

use crate::error::{RecoveryError, RecoveryResult};
use crate::fault::{Fault, FaultKind, FaultSummary};

/// 복구 동작 핸들러.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// Fault 컨텍스트의 시리즈를 즉시 다시 조회합니다.
    async fn retry(&self, fault: &Fault) -> RecoveryResult<()>;

    /// 업스트림 연결을 다시 수립합니다.
    async fn reconnect(&self, fault: &Fault) -> RecoveryResult<()>;

    /// 수집 상태를 초기화합니다.
    async fn reset(&self, fault: &Fault) -> RecoveryResult<()>;
}

/// 에스컬레이션 알림 수신자.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// 운영자에게 알립니다.
    async fn notify(&self, fault: &FaultSummary) -> RecoveryResult<()>;
}

/// 로그로만 알리는 수신자.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, fault: &FaultSummary) -> RecoveryResult<()> {
        error!(
            fault_id = %fault.id,
            kind = %fault.kind,
            severity = %fault.severity,
            retry_count = fault.retry_count,
            "운영자 조치 필요: {}",
            fault.message
        );
        Ok(())
    }
}

/// 대체 경로 함수.
pub type FallbackFn = Arc<dyn Fn(&Fault) -> RecoveryResult<()> + Send + Sync>;

/// 종류별 대체 경로 레지스트리.
#[derive(Clone, Default)]
pub struct FallbackRegistry {
    handlers: HashMap<FaultKind, FallbackFn>,
}

impl FallbackRegistry {
    /// 빈 레지스트리.
    pub fn new() -> Self {
        Self::default()
    }

    /// 대체 경로를 등록합니다. 같은 종류의 기존 경로는 교체됩니다.
    pub fn register<F>(&mut self, kind: FaultKind, handler: F)
    where
        F: Fn(&Fault) -> RecoveryResult<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// 등록 여부.
    pub fn contains(&self, kind: FaultKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// 대체 경로를 실행합니다.
    pub fn run(&self, fault: &Fault) -> RecoveryResult<()> {
        match self.handlers.get(&fault.kind) {
            Some(handler) => handler(fault),
            None => Err(RecoveryError::NoFallback(fault.kind.to_string())),
        }
    }
}

impl fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::NewFault;
    use chrono::Utc;

    #[test]
    fn test_fallback_registry() {
        let mut registry = FallbackRegistry::new();
        registry.register(FaultKind::Connection, |_| Ok(()));

        let conn = NewFault::new(FaultKind::Connection, "down").into_fault(Utc::now());
        let data = NewFault::new(FaultKind::Data, "bad").into_fault(Utc::now());

        assert!(registry.run(&conn).is_ok());
        assert!(matches!(registry.run(&data), Err(RecoveryError::NoFallback(_))));
    }
}
