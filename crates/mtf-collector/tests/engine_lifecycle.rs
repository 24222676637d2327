//! Engine start/stop, caller surface and live configuration.

mod common;

use chrono::Duration as ChronoDuration;
use common::{base_time, config_for, manual_clock, FixedIndicators, ScriptedSource, Step};
use mtf_collector::{EngineError, MtfEngine, PublishOutcome};
use mtf_core::{ConfigDelta, SyncError, Timeframe};
use mtf_recovery::{
    FaultContext, FaultKind, FaultSeverity, RecoveryAction, RecoveryStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn engine_with(source: Arc<ScriptedSource>, timeframes: &[Timeframe]) -> MtfEngine {
    MtfEngine::builder(config_for(timeframes), source, Arc::new(FixedIndicators(5)))
        .clock(manual_clock())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_start_publishes_snapshot_and_shuts_down() {
    let engine = engine_with(ScriptedSource::new([]), &[Timeframe::M1, Timeframe::M5]);
    let mut snapshots = engine.subscribe_snapshots();

    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = engine.get_snapshot("EURUSD").unwrap();
    assert_eq!(snapshot.master_timeframe, Timeframe::M1);
    assert_eq!(snapshot.timeframes.len(), 2);
    assert!((snapshot.sync_quality - 1.0).abs() < 1e-12);
    let received = snapshots.recv().await.unwrap();
    assert_eq!(received.symbol, "EURUSD");

    let status = engine.status();
    assert!(status.running);
    assert_eq!(status.tracked_symbols, 1);
    assert_eq!(status.synchronized_symbols, 1);
    assert_eq!(status.series, 2);
    assert!(status.stats.total_syncs >= 1);
    assert!(status.stats.data_points_collected >= 2);
    assert!(status.collectors.iter().all(|c| c.polls >= 1 && c.failures == 0));
    assert!(status.healthy);

    assert!(engine.shutdown().await);
    assert!(!engine.is_running());
    assert!(matches!(
        engine.register_series("EURUSD", Timeframe::H1),
        Err(EngineError::Stopped)
    ));
    assert!(matches!(engine.start(), Err(EngineError::Stopped)));
}

#[tokio::test]
async fn test_duplicate_series_rejected() {
    let engine = engine_with(ScriptedSource::new([]), &[Timeframe::M1]);
    assert!(matches!(
        engine.register_series("EURUSD", Timeframe::M1),
        Err(EngineError::Sync(SyncError::DuplicateSeries(_)))
    ));

    assert!(engine.register_series("EURUSD", Timeframe::H1).is_ok());
    assert_eq!(engine.status().series, 2);
}

#[test]
fn test_invalid_config_fails_at_construction() {
    let mut config = config_for(&[Timeframe::M1]);
    config.collector.history_capacity = 0;
    let result = MtfEngine::new(
        config,
        ScriptedSource::new([]),
        Arc::new(FixedIndicators(5)),
    );
    assert!(matches!(result, Err(EngineError::Sync(e)) if e.is_config()));
}

#[tokio::test]
async fn test_older_fetch_never_overwrites_newer_sample() {
    let newer = base_time() + ChronoDuration::minutes(1);
    let source = ScriptedSource::new([Step::Bar(newer), Step::Bar(base_time())]);
    let engine = engine_with(source, &[Timeframe::M1]);
    let collector = engine.collector("EURUSD", Timeframe::M1).unwrap();

    assert_eq!(collector.poll_once().await.unwrap(), PublishOutcome::Published);
    let visible = engine.series("EURUSD", Timeframe::M1).unwrap();

    assert_eq!(collector.poll_once().await.unwrap(), PublishOutcome::Stale);
    let after = engine.series("EURUSD", Timeframe::M1).unwrap();
    assert!(Arc::ptr_eq(&visible, &after));
    assert_eq!(after.timestamp, newer);
    assert_eq!(engine.history("EURUSD", Timeframe::M1, 10).len(), 1);
    assert!(engine.get_health().healthy);
}

#[tokio::test]
async fn test_reset_keeps_newest_timestamp_guard() {
    let newer = base_time() + ChronoDuration::seconds(120);
    let older = base_time() + ChronoDuration::seconds(60);
    let source = ScriptedSource::new([Step::Bar(newer), Step::Bar(older)]);
    let engine = engine_with(source, &[Timeframe::M1, Timeframe::M5]);
    let collector = engine.collector("EURUSD", Timeframe::M1).unwrap();

    assert_eq!(collector.poll_once().await.unwrap(), PublishOutcome::Published);
    collector.reset();
    assert_eq!(collector.poll_once().await.unwrap(), PublishOutcome::Stale);
    assert_eq!(engine.series("EURUSD", Timeframe::M1).unwrap().timestamp, newer);
    assert_eq!(engine.history("EURUSD", Timeframe::M1, 10).len(), 1);

    // a context-free SYSTEM fault resets every collector
    let id = engine.report_fault(
        FaultKind::System,
        "worker pool exhausted",
        FaultContext::new(),
        FaultSeverity::Medium,
    );
    let outcome = engine.recovery().recover(id).await.unwrap();
    assert_eq!(outcome.status, RecoveryStatus::Recovered(RecoveryAction::Reset));
    assert!(engine.get_series("EURUSD", "M1").is_some());
    assert_eq!(engine.history("EURUSD", Timeframe::M1, 10).len(), 1);
}

#[tokio::test]
async fn test_untracked_fault_is_resolved_when_limit_reached() {
    let mut config = config_for(&[Timeframe::M1]);
    config.recovery.history_capacity = 2;
    let source = ScriptedSource::new([Step::Fail, Step::Fail, Step::Fail]);
    let engine = MtfEngine::builder(config, source, Arc::new(FixedIndicators(5)))
        .clock(manual_clock())
        .build()
        .unwrap();
    let collector = engine.collector("EURUSD", Timeframe::M1).unwrap();

    for _ in 0..3 {
        assert!(collector.poll_once().await.is_err());
    }
    assert_eq!(collector.status().outstanding_faults, 2);
    assert_eq!(engine.recovery().active_faults().len(), 2);

    assert!(collector.poll_once().await.is_ok());
    assert!(collector.poll_once().await.is_ok());
    assert!(engine.recovery().active_faults().is_empty());
}

#[tokio::test]
async fn test_series_lookup_by_name() {
    let engine = engine_with(ScriptedSource::new([]), &[Timeframe::M5]);
    let collector = engine.collector("EURUSD", Timeframe::M5).unwrap();
    collector.poll_once().await.unwrap();

    assert!(engine.get_series("EURUSD", "M5").is_some());
    assert!(engine.get_series("EURUSD", "5m").is_some());
    assert!(engine.get_series("EURUSD", "M1").is_none());
    assert!(engine.get_series("EURUSD", "bogus").is_none());
    assert_eq!(engine.latest("EURUSD").len(), 1);
    assert!((engine.series("EURUSD", Timeframe::M5).unwrap().quality_score - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_apply_delta_updates_running_components() {
    let engine = engine_with(ScriptedSource::new([]), &[Timeframe::M1]);

    let delta = ConfigDelta {
        consecutive_fault_threshold: Some(1),
        tolerance_secs: Some(45.0),
        ..Default::default()
    };
    let updated = engine.apply_delta(&delta).unwrap();
    assert_eq!(updated.synchronizer.tolerance_secs, 45.0);
    assert_eq!(engine.recovery().policy().consecutive_threshold, 1);

    let id = engine.report_fault(
        FaultKind::Validation,
        "malformed request",
        FaultContext::new(),
        FaultSeverity::Low,
    );
    assert!(!engine.get_health().healthy);
    assert!(engine.resolve_fault(id, "handled"));
    assert!(!engine.resolve_fault(id, "handled again"));
    assert!(engine.get_health().healthy);

    let rejected = ConfigDelta {
        min_sync_quality: Some(-0.1),
        ..Default::default()
    };
    assert!(engine.apply_delta(&rejected).is_err());
    assert_eq!(engine.config().synchronizer.tolerance_secs, 45.0);
}

#[tokio::test]
async fn test_fault_report_lists_active_faults() {
    let engine = engine_with(ScriptedSource::new([Step::Disconnect]), &[Timeframe::M1]);
    let collector = engine.collector("EURUSD", Timeframe::M1).unwrap();
    assert!(collector.poll_once().await.is_err());

    let report = engine.fault_report();
    assert_eq!(report.active.len(), 1);
    assert_eq!(report.active_by_kind, vec![(FaultKind::Data, 1)]);
    assert!(!report.to_string().is_empty());
}
