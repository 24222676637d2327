//! 동기화 통계 구조체.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 동기화 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// 게시된 스냅샷 수
    pub total_syncs: u64,
    /// 집계 품질이 하한 이상인 스냅샷 수
    pub successful_syncs: u64,
    /// 샘플은 있으나 스냅샷을 만들지 못한 횟수
    pub failed_syncs: u64,
    /// 게시된 샘플이 없어 건너뛴 심볼 수
    pub skipped_symbols: u64,
    /// 동기화 주기 수
    pub cycles: u64,
    /// 주기당 평균 소요 시간 (밀리초)
    pub avg_sync_time_ms: f64,
    /// 수집된 샘플 수
    pub data_points_collected: u64,
    /// 마지막 스냅샷 게시 시각
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            0.0
        } else {
            (self.successful_syncs as f64 / self.total_syncs as f64) * 100.0
        }
    }

    /// 주기 소요 시간을 누적 평균에 반영합니다.
    pub fn record_cycle(&mut self, elapsed: Duration) {
        self.cycles += 1;
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_sync_time_ms += (ms - self.avg_sync_time_ms) / self.cycles as f64;
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total_syncs,
            success = self.successful_syncs,
            failed = self.failed_syncs,
            skipped = self.skipped_symbols,
            data_points = self.data_points_collected,
            success_rate = format!("{:.1}%", self.success_rate()),
            avg_sync_time = format!("{:.2}ms", self.avg_sync_time_ms),
            "동기화 통계"
        );
    }
}
