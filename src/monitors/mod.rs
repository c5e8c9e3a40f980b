//! 定期収集モニター
//!
//! 各モニターは自分のメトリクスを登録し、定期タスクから `collect` を
//! 呼ばれて値を記録する。検査内容そのもの（脆弱性リスト、監査スコアなど）は
//! 差し替え可能なソースから受け取る。

pub mod anomaly;
pub mod audit;
pub mod compliance;
pub mod security;

pub use anomaly::{AnomalyMonitor, DetectionMethod};
pub use audit::{AuditReport, AuditRunner, AuditMonitor};
pub use compliance::{ComplianceCheck, ComplianceMonitor};
pub use security::{SecurityFinding, SecurityMonitor, SecurityScanner, Severity};

use crate::error::{Result, TelemetryError};
use crate::telemetry::collector::{PeriodicCollector, StartPolicy};
use crate::telemetry::metrics::MetricDefinition;
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// モニターの実行スケジュール
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSchedule {
    pub interval: Duration,
    pub policy: StartPolicy,
}

/// モニター個別設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorSettings {
    /// 有効化
    pub enabled: bool,
    /// 実行間隔（秒）
    pub interval_secs: u64,
}

impl MonitorSettings {
    pub fn new(enabled: bool, interval_secs: u64) -> Self {
        Self {
            enabled,
            interval_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::new(true, 300)
    }
}

/// 定期収集モニター
#[async_trait]
pub trait Monitor: Send + Sync {
    /// モニター名（タスク名として使用）
    fn name(&self) -> &str;

    /// 実行スケジュール
    fn schedule(&self) -> MonitorSchedule;

    /// 自分が所有するメトリクスを登録
    async fn register(&self, registry: &MetricRegistry) -> Result<()>;

    /// 1回分の収集を行い、結果をレジストリへ記録
    async fn collect(&self, registry: &MetricRegistry) -> Result<()>;
}

/// 登録済みなら何もしない登録
///
/// モニターの再起動で同じ定義を登録し直すケースを許容する。
pub async fn ensure_registered(registry: &MetricRegistry, definition: MetricDefinition) -> Result<()> {
    match registry.register(definition).await {
        Ok(_) | Err(TelemetryError::DuplicateMetric(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// モニターを定期タスクとして実行するランナー
pub struct MonitorRunner {
    monitor: Arc<dyn Monitor>,
    registry: Arc<MetricRegistry>,
    task: PeriodicCollector,
}

impl MonitorRunner {
    /// 新しいランナーを作成
    pub fn new(monitor: Arc<dyn Monitor>, registry: Arc<MetricRegistry>) -> Self {
        let task = PeriodicCollector::new(monitor.name());
        Self {
            monitor,
            registry,
            task,
        }
    }

    /// モニター名
    pub fn name(&self) -> &str {
        self.monitor.name()
    }

    /// メトリクスを登録して定期実行を開始
    pub async fn start(&self) -> Result<()> {
        if self.task.is_running() {
            return Err(TelemetryError::AlreadyRunning(self.name().to_string()));
        }

        self.monitor.register(&self.registry).await?;

        let schedule = self.monitor.schedule();
        let monitor = Arc::clone(&self.monitor);
        let registry = Arc::clone(&self.registry);
        self.task.start(schedule.interval, schedule.policy, move || {
            let monitor = Arc::clone(&monitor);
            let registry = Arc::clone(&registry);
            async move { monitor.collect(&registry).await }
        })?;

        info!(monitor = %self.name(), "Monitor started");
        Ok(())
    }

    /// 1回だけ即座に収集する
    pub async fn run_once(&self) -> Result<()> {
        self.monitor.collect(&self.registry).await
    }

    /// 定期実行を停止
    pub fn stop(&self) -> Result<()> {
        self.task.stop()
    }

    /// 停止して実行中の収集を待つ
    pub async fn shutdown(&self) -> Result<()> {
        self.task.shutdown().await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// 開始された収集回数
    pub fn ticks(&self) -> u64 {
        self.task.ticks()
    }

    /// 失敗した収集回数
    pub fn failures(&self) -> u64 {
        self.task.failures()
    }
}
