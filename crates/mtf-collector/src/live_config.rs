//! 실행 중 공유되는 설정 핸들.
//!
//! 워커는 매 주기마다 현재 설정의 `Arc`를 가져가 사용하며, 변경은
//! 검증된 사본으로 통째로 교체됩니다.

use mtf_core::{ConfigDelta, SyncConfig, SyncResult};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct LiveConfig {
    current: RwLock<Arc<SyncConfig>>,
}

impl LiveConfig {
    /// 검증된 설정으로 생성합니다.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// 현재 설정.
    pub fn get(&self) -> Arc<SyncConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// 변경분을 적용합니다. 검증에 실패하면 현재 설정은 그대로 유지됩니다.
    pub fn apply(&self, delta: &ConfigDelta) -> SyncResult<Arc<SyncConfig>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = SyncConfig::clone(&current);
        next.apply_delta(delta)?;
        let next = Arc::new(next);
        *current = Arc::clone(&next);
        Ok(next)
    }
}
