//! 異常検知モニター
//!
//! 監視対象メトリクスの最新値を、それ以前の履歴に対する Z-score で評価する。
//! 最初の間隔が経過してから実行を開始する。

use super::{ensure_registered, Monitor, MonitorSchedule};
use crate::error::Result;
use crate::telemetry::collector::StartPolicy;
use crate::telemetry::detector::AnomalyDetector;
use crate::telemetry::metrics::{MetricDefinition, MetricKind, MetricStats};
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub const METRIC_ANOMALIES_DETECTED: &str = "anomalies_detected";

/// 判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// 最新値を基準区間の Z-score で評価
    ZScore,
    /// 最新値を直前 `window` 件の移動平均と比較
    MovingAverage { window: usize },
}

/// 異常検知モニター
pub struct AnomalyMonitor {
    watched: Vec<String>,
    detector: AnomalyDetector,
    method: DetectionMethod,
    window: usize,
    interval: Duration,
}

impl AnomalyMonitor {
    pub fn new<I, S>(watched: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            watched: watched.into_iter().map(Into::into).collect(),
            detector: AnomalyDetector::new(),
            method: DetectionMethod::ZScore,
            window: 100,
            interval,
        }
    }

    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_method(mut self, method: DetectionMethod) -> Self {
        self.method = method;
        self
    }

    /// 評価に使う履歴の長さ
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    /// スコア記録用のメトリクス名
    pub fn score_metric(name: &str) -> String {
        format!("anomaly_score.{}", name)
    }
}

#[async_trait]
impl Monitor for AnomalyMonitor {
    fn name(&self) -> &str {
        "anomaly_detection"
    }

    fn schedule(&self) -> MonitorSchedule {
        MonitorSchedule {
            interval: self.interval,
            policy: StartPolicy::AfterInterval,
        }
    }

    async fn register(&self, registry: &MetricRegistry) -> Result<()> {
        ensure_registered(
            registry,
            MetricDefinition::new(METRIC_ANOMALIES_DETECTED, MetricKind::Count)
                .with_description("Watched metrics currently flagged as anomalous")
                .with_threshold(1.0)
                .with_tag("anomaly"),
        )
        .await
    }

    async fn collect(&self, registry: &MetricRegistry) -> Result<()> {
        let mut anomalies = 0usize;

        for name in &self.watched {
            let history = match registry.history(name, self.window).await {
                Ok(history) => history,
                Err(e) if e.is_not_found() => {
                    debug!(metric = %name, "Watched metric not registered yet");
                    continue;
                }
                Err(e) => return Err(e),
            };

            // history は新しい順。先頭が評価対象、残りが基準
            let Some((current, baseline)) = history.split_first() else {
                continue;
            };
            let result = match self.method {
                DetectionMethod::ZScore => {
                    let stats = MetricStats::from_values(baseline.iter().map(|p| p.value).collect());
                    self.detector.detect_zscore(current.value, &stats)
                }
                DetectionMethod::MovingAverage { window } => {
                    let oldest_first: Vec<f64> = history.iter().rev().map(|p| p.value).collect();
                    self.detector.detect_moving_average(&oldest_first, window)
                }
            };

            let score_definition = MetricDefinition::new(Self::score_metric(name), MetricKind::Gauge)
                .with_description(format!("Anomaly score for {}", name))
                .with_tag("anomaly");
            registry.record_or_register(&score_definition, result.score).await?;

            if result.is_anomaly {
                anomalies += 1;
                warn!(metric = %name, value = current.value, reason = %result.reason, "Anomaly detected");
            }
        }

        registry
            .record(METRIC_ANOMALIES_DETECTED, anomalies as f64)
            .await
    }
}
