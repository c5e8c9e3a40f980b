//! スナップショットとエクスポート用ワイヤーフォーマット

use crate::error::Result;
use crate::telemetry::metrics::{MetricDefinition, SamplePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 1メトリクス分のスナップショット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// 定義
    pub definition: MetricDefinition,
    /// アラート状態
    pub alerting: bool,
    /// 最新サンプル
    pub latest: Option<SamplePoint>,
    /// 閾値
    pub threshold: Option<f64>,
    /// 保持サンプル数
    pub sample_count: usize,
}

/// 全メトリクスの読み取り専用ビュー
///
/// メトリクス間の鮮度は揃っていない場合がある。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// 作成時刻
    pub taken_at: DateTime<Utc>,
    /// 名前順のメトリクス
    pub metrics: BTreeMap<String, MetricSnapshot>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    /// アラート中のメトリクス名
    pub fn alerting(&self) -> Vec<&str> {
        self.metrics
            .iter()
            .filter(|(_, metric)| metric.alerting)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// エクスポート用レコードへ変換
    pub fn to_export_records(&self) -> BTreeMap<String, ExportRecord> {
        self.metrics
            .iter()
            .map(|(name, metric)| (name.clone(), ExportRecord::from(metric)))
            .collect()
    }

    /// エクスポート形式の JSON にシリアライズ
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_export_records())?)
    }
}

/// エクスポートのワイヤーフォーマット
///
/// 既存のダッシュボードが読むフィールド集合なので変更しないこと。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub unit: String,
    pub alert: bool,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl From<&MetricSnapshot> for ExportRecord {
    fn from(metric: &MetricSnapshot) -> Self {
        let definition = &metric.definition;
        Self {
            kind: definition.kind.as_str().to_string(),
            description: definition.description.clone(),
            unit: definition.unit.clone(),
            alert: metric.alerting,
            tags: definition.tags.iter().cloned().collect(),
            latest_value: metric.latest.map(|point| point.value),
            latest_timestamp: metric.latest.map(|point| point.timestamp),
            threshold: metric.threshold,
        }
    }
}
