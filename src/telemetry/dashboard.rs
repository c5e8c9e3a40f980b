//! ダッシュボード向けの読み取り API
//!
//! HTML の描画は行わない。表示側が使うデータのみを組み立てる。

use crate::error::Result;
use crate::telemetry::metrics::{MetricStats, SamplePoint};
use crate::telemetry::registry::MetricRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// ダッシュボードレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    /// 作成時刻
    pub taken_at: DateTime<Utc>,
    /// 登録メトリクス数
    pub total_metrics: usize,
    /// アラート中のメトリクス
    pub alerting: Vec<String>,
    /// メトリクスごとの表示データ
    pub metrics: BTreeMap<String, DashboardMetric>,
}

/// メトリクス1件分の表示データ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetric {
    pub kind: String,
    pub unit: String,
    pub description: String,
    pub latest: Option<f64>,
    pub threshold: Option<f64>,
    pub alerting: bool,
    pub summary: MetricSummaryItem,
}

/// メトリクス要約項目
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSummaryItem {
    /// 平均値
    pub avg: f64,
    /// 最小値
    pub min: f64,
    /// 最大値
    pub max: f64,
    /// 95パーセンタイル
    pub p95: f64,
    /// サンプル数
    pub count: usize,
}

impl From<&MetricStats> for MetricSummaryItem {
    fn from(stats: &MetricStats) -> Self {
        Self {
            avg: stats.mean,
            min: stats.min,
            max: stats.max,
            p95: stats.p95,
            count: stats.count,
        }
    }
}

/// ダッシュボードマネージャー
pub struct DashboardManager {
    registry: Arc<MetricRegistry>,
}

impl DashboardManager {
    /// 新しいマネージャーを作成
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }

    /// 現在のダッシュボードデータを取得
    pub async fn get_dashboard(&self) -> DashboardResponse {
        let snapshot = self.registry.snapshot().await;
        let mut metrics = BTreeMap::new();

        for (name, metric) in &snapshot.metrics {
            // スナップショット取得後に登録解除された場合は空の要約にする
            let summary = self
                .registry
                .stats(name)
                .await
                .map(|stats| MetricSummaryItem::from(&stats))
                .unwrap_or_default();

            metrics.insert(
                name.clone(),
                DashboardMetric {
                    kind: metric.definition.kind.as_str().to_string(),
                    unit: metric.definition.unit.clone(),
                    description: metric.definition.description.clone(),
                    latest: metric.latest.map(|point| point.value),
                    threshold: metric.threshold,
                    alerting: metric.alerting,
                    summary,
                },
            );
        }

        DashboardResponse {
            taken_at: snapshot.taken_at,
            total_metrics: snapshot.len(),
            alerting: snapshot.alerting().into_iter().map(String::from).collect(),
            metrics,
        }
    }

    /// 特定メトリクスの時系列データを古い順で取得
    pub async fn get_metric_timeseries(&self, name: &str, limit: usize) -> Result<Vec<SamplePoint>> {
        let mut points = self.registry.history(name, limit).await?;
        points.reverse();
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::metrics::{MetricDefinition, MetricKind};

    #[tokio::test]
    async fn test_dashboard_on_empty_registry() {
        let dashboard = DashboardManager::new(Arc::new(MetricRegistry::default()));
        let response = dashboard.get_dashboard().await;

        assert_eq!(response.total_metrics, 0);
        assert!(response.metrics.is_empty());
        assert!(response.alerting.is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_summary() {
        let registry = Arc::new(MetricRegistry::default());
        registry
            .register(
                MetricDefinition::new("cache_hit_rate", MetricKind::Percentage).with_threshold(99.0),
            )
            .await
            .unwrap();
        registry
            .register(MetricDefinition::new("api_latency", MetricKind::Latency).with_threshold(200.0))
            .await
            .unwrap();
        for value in [80.0, 90.0, 100.0] {
            registry.record("cache_hit_rate", value).await.unwrap();
        }
        registry.record("api_latency", 120.0).await.unwrap();

        let dashboard = DashboardManager::new(Arc::clone(&registry));
        let response = dashboard.get_dashboard().await;

        assert_eq!(response.total_metrics, 2);
        assert_eq!(response.alerting, vec!["cache_hit_rate".to_string()]);

        let cache = &response.metrics["cache_hit_rate"];
        assert_eq!(cache.unit, "%");
        assert_eq!(cache.latest, Some(100.0));
        assert_eq!(cache.summary.avg, 90.0);
        assert_eq!(cache.summary.min, 80.0);
        assert_eq!(cache.summary.max, 100.0);
        assert_eq!(cache.summary.count, 3);
    }

    #[tokio::test]
    async fn test_metric_timeseries_is_chronological() {
        let registry = Arc::new(MetricRegistry::default());
        registry
            .register(MetricDefinition::new("fps", MetricKind::Gauge))
            .await
            .unwrap();
        for value in [60.0, 58.0, 30.0, 59.0] {
            registry.record("fps", value).await.unwrap();
        }

        let dashboard = DashboardManager::new(registry);
        let series = dashboard.get_metric_timeseries("fps", 3).await.unwrap();
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![58.0, 30.0, 59.0]);

        assert!(dashboard
            .get_metric_timeseries("missing", 3)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
