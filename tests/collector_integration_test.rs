//! 定期収集タスクの統合テスト
//!
//! 時間に関する検証は負荷の高い CI でも通るよう余裕を持たせている。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_registry::{
    MetricDefinition, MetricKind, MetricRegistry, PeriodicCollector, StartPolicy, TelemetryError,
};

#[tokio::test]
async fn test_no_tick_begins_after_stop_returns() {
    let collector = PeriodicCollector::new("heartbeat");
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    collector
        .start(Duration::from_millis(20), StartPolicy::Immediate, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(110)).await;
    collector.stop().unwrap();
    let ticks_at_stop = collector.ticks();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(collector.ticks(), ticks_at_stop);
    assert!(!collector.is_running());
    // 開始済みのティックは完了している
    assert_eq!(calls.load(Ordering::SeqCst) as u64, ticks_at_stop);
}

#[tokio::test]
async fn test_tick_count_tracks_elapsed_time() {
    let interval = Duration::from_millis(50);
    let collector = PeriodicCollector::new("sampler");

    let started = Instant::now();
    collector
        .start(interval, StartPolicy::AfterInterval, || async { Ok(()) })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(520)).await;
    collector.shutdown().await.unwrap();
    let elapsed = started.elapsed();
    let ticks = collector.ticks();

    // k ティックは約 k*d 経過時点で起きている
    let expected = (elapsed.as_millis() / interval.as_millis()) as u64;
    assert!(ticks >= 5, "only {ticks} ticks in {elapsed:?}");
    assert!(ticks <= expected, "{ticks} ticks exceeds {expected} for {elapsed:?}");
}

#[tokio::test]
async fn test_independent_collectors_feed_one_registry() {
    let registry = Arc::new(MetricRegistry::default());
    for name in ["security_score", "compliance_score"] {
        registry
            .register(MetricDefinition::new(name, MetricKind::Score))
            .await
            .unwrap();
    }

    let security = PeriodicCollector::new("security_scan");
    let compliance = PeriodicCollector::new("compliance_check");

    let reg = Arc::clone(&registry);
    security
        .start(Duration::from_millis(15), StartPolicy::Immediate, move || {
            let reg = Arc::clone(&reg);
            async move { reg.record("security_score", 88.0).await }
        })
        .unwrap();

    let reg = Arc::clone(&registry);
    compliance
        .start(Duration::from_millis(25), StartPolicy::Immediate, move || {
            let reg = Arc::clone(&reg);
            async move { reg.record("compliance_score", 75.0).await }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    // 片方を止めてももう片方は動き続ける
    security.shutdown().await.unwrap();
    let security_samples = registry.history("security_score", usize::MAX).await.unwrap().len();
    let compliance_before = compliance.ticks();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(compliance.is_running());
    assert!(compliance.ticks() > compliance_before);
    assert_eq!(
        registry.history("security_score", usize::MAX).await.unwrap().len(),
        security_samples
    );

    compliance.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_errors_are_counted_not_fatal() {
    let collector = PeriodicCollector::new("flaky_scan");
    let registry = Arc::new(MetricRegistry::default());

    let reg = Arc::clone(&registry);
    collector
        .start(Duration::from_millis(15), StartPolicy::Immediate, move || {
            let reg = Arc::clone(&reg);
            // 未登録メトリクスへの記録は毎回 NotFound になる
            async move { reg.record("unregistered", 1.0).await }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(collector.is_running());
    collector.shutdown().await.unwrap();

    assert!(collector.ticks() >= 3);
    assert_eq!(collector.failures(), collector.ticks());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_state_misuse_errors() {
    let collector = PeriodicCollector::new("export_loop");

    assert!(matches!(
        collector.stop().unwrap_err(),
        TelemetryError::NotRunning(_)
    ));

    collector
        .start(Duration::from_secs(60), StartPolicy::AfterInterval, || async { Ok(()) })
        .unwrap();
    let err = collector
        .start(Duration::from_secs(60), StartPolicy::AfterInterval, || async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, TelemetryError::AlreadyRunning(name) if name == "export_loop"));

    collector.stop().unwrap();
    assert_eq!(collector.ticks(), 0);
}
