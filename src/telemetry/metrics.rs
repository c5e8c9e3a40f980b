//! メトリクス型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// メトリクスの種類（表示用の分類タグ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// レイテンシ（ms など）
    Latency,
    /// スコア（0-100）
    Score,
    /// 件数
    Count,
    /// 比率（%）
    Percentage,
    /// 任意のゲージ値
    Gauge,
    /// カスタム分類
    Custom(String),
}

impl MetricKind {
    /// 分類名を取得
    pub fn as_str(&self) -> &str {
        match self {
            Self::Latency => "latency",
            Self::Score => "score",
            Self::Count => "count",
            Self::Percentage => "percentage",
            Self::Gauge => "gauge",
            Self::Custom(name) => name,
        }
    }

    /// 既定の単位を取得
    pub fn default_unit(&self) -> &str {
        match self {
            Self::Latency => "ms",
            Self::Score => "points",
            Self::Count => "count",
            Self::Percentage => "%",
            Self::Gauge | Self::Custom(_) => "",
        }
    }
}

/// メトリクス定義
///
/// 名前はレジストリ内で一意であり、登録後は変更されない。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDefinition {
    /// メトリクス名（一意キー）
    pub name: String,
    /// 種類
    pub kind: MetricKind,
    /// 説明
    pub description: String,
    /// 単位
    pub unit: String,
    /// アラート閾値（値 >= 閾値 でアラート）
    pub threshold: Option<f64>,
    /// ラベル
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl MetricDefinition {
    /// 新しいメトリクス定義を作成
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        let unit = kind.default_unit().to_string();
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            unit,
            threshold: None,
            tags: BTreeSet::new(),
        }
    }

    /// 説明を設定
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 単位を設定
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// 閾値を設定
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// ラベルを追加
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// ラベルを複数追加
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// 値が閾値を超えているか
    pub fn crosses_threshold(&self, value: f64) -> bool {
        self.threshold.is_some_and(|threshold| value >= threshold)
    }
}

/// 時系列の1点
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SamplePoint {
    /// 値
    pub value: f64,
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
}

impl SamplePoint {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// メトリクス統計
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricStats {
    /// 最小値
    pub min: f64,
    /// 最大値
    pub max: f64,
    /// 平均値
    pub mean: f64,
    /// 標準偏差
    pub std_dev: f64,
    /// パーセンタイル（P50, P95, P99）
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// サンプル数
    pub count: usize,
}

impl MetricStats {
    /// 値のリストから統計を計算
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let min = values[0];
        let max = values[count - 1];
        let mean = values.iter().sum::<f64>() / count as f64;

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let std_dev = variance.sqrt();

        Self {
            min,
            max,
            mean,
            std_dev,
            p50: percentile(&values, 0.5),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            count,
        }
    }
}

impl Default for MetricStats {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
            count: 0,
        }
    }
}

/// パーセンタイルを計算（ソート済み前提）
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let index = (p * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}
