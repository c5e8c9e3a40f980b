//! メトリクスレジストリ
//!
//! 名前 → 系列セルのマップを構造ロック（`RwLock<HashMap>`）で保護し、
//! 各系列は独立した `RwLock` を持つ。ある系列の読み書きが他の系列の
//! 書き込みをブロックすることはない。

use crate::error::{Result, TelemetryError};
use crate::telemetry::alerts::{
    AlertDispatcher, AlertEvent, AlertHandler, AlertMode, DEFAULT_ALERT_QUEUE_CAPACITY,
};
use crate::telemetry::metrics::{MetricDefinition, MetricStats, SamplePoint};
use crate::telemetry::snapshot::{MetricSnapshot, Snapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 同名メトリクス再登録時のポリシー
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// `DuplicateMetric` で拒否
    #[default]
    Reject,
    /// 空の系列で原子的に置き換え
    Replace,
}

/// レジストリ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// 再登録ポリシー
    pub duplicate_policy: DuplicatePolicy,
    /// 定義に閾値がない場合に適用する閾値
    pub default_threshold: Option<f64>,
    /// アラート発火モード
    pub alert_mode: AlertMode,
    /// アラートキュー容量
    pub alert_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            default_threshold: None,
            alert_mode: AlertMode::Level,
            alert_queue_capacity: DEFAULT_ALERT_QUEUE_CAPACITY,
        }
    }
}

/// 1メトリクス分の時系列
///
/// レジストリが排他的に所有し、外部にはコピーのみを渡す。
#[derive(Debug)]
pub struct MetricSeries {
    definition: MetricDefinition,
    points: Vec<SamplePoint>,
    sum: f64,
    alerting: bool,
}

impl MetricSeries {
    fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            points: Vec::new(),
            sum: 0.0,
            alerting: false,
        }
    }

    /// サンプルを追記し、発火すべきアラートを返す
    fn append(&mut self, value: f64, mode: AlertMode) -> Option<AlertEvent> {
        let now = Utc::now();
        // 壁時計が巻き戻っても系列内の順序は単調に保つ
        let timestamp = match self.points.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        self.points.push(SamplePoint::new(value, timestamp));
        self.sum += value;

        let threshold = self.definition.threshold?;
        if value < threshold {
            return None;
        }

        let was_alerting = self.alerting;
        self.alerting = true;

        match mode {
            AlertMode::Edge if was_alerting => None,
            _ => Some(AlertEvent::new(
                self.definition.name.clone(),
                value,
                threshold,
                timestamp,
            )),
        }
    }

    fn latest(&self) -> Option<SamplePoint> {
        self.points.last().copied()
    }

    fn average(&self) -> f64 {
        if self.points.is_empty() {
            0.0
        } else {
            self.sum / self.points.len() as f64
        }
    }

    fn to_snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            definition: self.definition.clone(),
            alerting: self.alerting,
            latest: self.latest(),
            threshold: self.definition.threshold,
            sample_count: self.points.len(),
        }
    }
}

/// 系列セル（系列ごとのロック）
pub type SeriesCell = Arc<RwLock<MetricSeries>>;

/// メトリクスレジストリ
pub struct MetricRegistry {
    config: RegistryConfig,
    series: RwLock<HashMap<String, SeriesCell>>,
    alerts: AlertDispatcher,
}

impl MetricRegistry {
    /// 新しいレジストリを作成
    pub fn new(config: RegistryConfig) -> Self {
        let alerts = AlertDispatcher::new(config.alert_queue_capacity);
        Self {
            config,
            series: RwLock::new(HashMap::new()),
            alerts,
        }
    }

    /// 設定を取得
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// メトリクスを登録
    pub async fn register(&self, definition: MetricDefinition) -> Result<MetricDefinition> {
        self.insert(definition, self.config.duplicate_policy).await
    }

    async fn insert(
        &self,
        mut definition: MetricDefinition,
        policy: DuplicatePolicy,
    ) -> Result<MetricDefinition> {
        if definition.name.trim().is_empty() {
            return Err(TelemetryError::InvalidInput(
                "metric name must not be empty".to_string(),
            ));
        }
        if definition.threshold.is_none() {
            definition.threshold = self.config.default_threshold;
        }

        let cell = Arc::new(RwLock::new(MetricSeries::new(definition.clone())));
        let mut series = self.series.write().await;

        match series.entry(definition.name.clone()) {
            Entry::Occupied(mut entry) => match policy {
                DuplicatePolicy::Reject => {
                    return Err(TelemetryError::DuplicateMetric(definition.name));
                }
                DuplicatePolicy::Replace => {
                    entry.insert(cell);
                    info!(metric = %definition.name, "Replaced metric registration");
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(cell);
                debug!(metric = %definition.name, kind = definition.kind.as_str(), "Registered metric");
            }
        }

        Ok(definition)
    }

    /// メトリクスの登録を解除
    pub async fn unregister(&self, name: &str) -> Result<MetricDefinition> {
        let removed = self.series.write().await.remove(name);
        let cell = removed.ok_or_else(|| TelemetryError::NotFound(name.to_string()))?;
        let definition = cell.read().await.definition.clone();
        info!(metric = %name, "Unregistered metric");
        Ok(definition)
    }

    async fn cell(&self, name: &str) -> Result<SeriesCell> {
        self.series
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| TelemetryError::NotFound(name.to_string()))
    }

    /// 値を記録
    ///
    /// 未登録の名前は `NotFound` を返し、メトリクスを暗黙に作成しない。
    pub async fn record(&self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(TelemetryError::InvalidInput(format!(
                "non-finite value for metric '{}': {}",
                name, value
            )));
        }

        let cell = self.cell(name).await?;
        let event = cell.write().await.append(value, self.config.alert_mode);

        if let Some(event) = event {
            debug!(metric = %name, value, threshold = event.threshold, "Threshold crossed");
            self.alerts.dispatch(event);
        }

        Ok(())
    }

    /// 未登録なら登録してから記録する
    ///
    /// 並行して別の呼び出し元が登録した場合はその系列へ記録する。
    pub async fn record_or_register(&self, definition: &MetricDefinition, value: f64) -> Result<()> {
        match self.record(&definition.name, value).await {
            Err(e) if e.is_not_found() => {
                match self.insert(definition.clone(), DuplicatePolicy::Reject).await {
                    Ok(_) | Err(TelemetryError::DuplicateMetric(_)) => {}
                    Err(e) => return Err(e),
                }
                self.record(&definition.name, value).await
            }
            other => other,
        }
    }

    /// 最新値を取得（空の系列は `None`）
    pub async fn latest(&self, name: &str) -> Result<Option<f64>> {
        let cell = self.cell(name).await?;
        let series = cell.read().await;
        Ok(series.latest().map(|point| point.value))
    }

    /// 全履歴の算術平均（空の系列は 0）
    pub async fn average(&self, name: &str) -> Result<f64> {
        let cell = self.cell(name).await?;
        let series = cell.read().await;
        Ok(series.average())
    }

    /// アラート状態を取得
    pub async fn is_alerting(&self, name: &str) -> Result<bool> {
        let cell = self.cell(name).await?;
        let alerting = cell.read().await.alerting;
        Ok(alerting)
    }

    /// アラート状態を明示的にリセット
    pub async fn reset_alert(&self, name: &str) -> Result<()> {
        let cell = self.cell(name).await?;
        cell.write().await.alerting = false;
        info!(metric = %name, "Alert state reset");
        Ok(())
    }

    /// 定義を取得
    pub async fn definition(&self, name: &str) -> Result<MetricDefinition> {
        let cell = self.cell(name).await?;
        let definition = cell.read().await.definition.clone();
        Ok(definition)
    }

    /// 直近の履歴を新しい順に取得
    pub async fn history(&self, name: &str, limit: usize) -> Result<Vec<SamplePoint>> {
        let cell = self.cell(name).await?;
        let series = cell.read().await;
        Ok(series.points.iter().rev().take(limit).copied().collect())
    }

    /// 全履歴の統計を取得
    pub async fn stats(&self, name: &str) -> Result<MetricStats> {
        let cell = self.cell(name).await?;
        let values: Vec<f64> = {
            let series = cell.read().await;
            series.points.iter().map(|point| point.value).collect()
        };
        Ok(MetricStats::from_values(values))
    }

    /// 全メトリクスのスナップショットを作成
    ///
    /// 構造ロックはセル参照のコピー中だけ保持し、各系列のロックは
    /// 1つずつ短時間だけ取得する。
    pub async fn snapshot(&self) -> Snapshot {
        let cells: Vec<(String, SeriesCell)> = {
            let series = self.series.read().await;
            series
                .iter()
                .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
                .collect()
        };

        let mut metrics = BTreeMap::new();
        for (name, cell) in cells {
            let entry = cell.read().await.to_snapshot();
            metrics.insert(name, entry);
        }

        Snapshot {
            taken_at: Utc::now(),
            metrics,
        }
    }

    /// 登録済みメトリクス名
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 登録されているか
    pub async fn contains(&self, name: &str) -> bool {
        self.series.read().await.contains_key(name)
    }

    /// 登録数
    pub async fn len(&self) -> usize {
        self.series.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// アラートハンドラーを設定
    pub async fn set_alert_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.alerts.set_handler(handler).await;
    }

    /// アラートハンドラーを解除
    pub async fn clear_alert_handler(&self) {
        self.alerts.clear_handler().await;
    }

    /// キュー投入済みアラート数
    pub fn alerts_fired(&self) -> u64 {
        self.alerts.alerts_fired()
    }

    /// 破棄されたアラート数
    pub fn alerts_dropped(&self) -> u64 {
        self.alerts.alerts_dropped()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
