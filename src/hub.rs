//! レジストリ・エクスポーター・モニターの組み立て
//!
//! グローバルなシングルトンは持たない。プロセス内で共有する場合は
//! `registry()` の `Arc` を渡して使う。

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::monitors::{
    AnomalyMonitor, AuditMonitor, AuditRunner, ComplianceCheck, ComplianceMonitor, Monitor,
    MonitorRunner, MonitorSettings, SecurityMonitor, SecurityScanner,
};
use crate::telemetry::dashboard::DashboardManager;
use crate::telemetry::exporter::{ExportSink, MetricsExporter};
use crate::telemetry::registry::MetricRegistry;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const HUB_TASK: &str = "telemetry_hub";

pub struct TelemetryHub {
    config: TelemetryConfig,
    registry: Arc<MetricRegistry>,
    exporter: MetricsExporter,
    runners: Vec<MonitorRunner>,
    started: AtomicBool,
}

impl TelemetryHub {
    /// 設定から作成（エクスポートは HTTP シンク）
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(MetricRegistry::new(config.registry.clone()));
        let exporter = MetricsExporter::new(Arc::clone(&registry), config.export.clone())?;
        Ok(Self::assemble(config, registry, exporter))
    }

    /// 任意のエクスポートシンクで作成
    pub fn with_sink(config: TelemetryConfig, sink: Arc<dyn ExportSink>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(MetricRegistry::new(config.registry.clone()));
        let exporter = MetricsExporter::with_sink(Arc::clone(&registry), config.export.clone(), sink);
        Ok(Self::assemble(config, registry, exporter))
    }

    fn assemble(config: TelemetryConfig, registry: Arc<MetricRegistry>, exporter: MetricsExporter) -> Self {
        Self {
            config,
            registry,
            exporter,
            runners: Vec::new(),
            started: AtomicBool::new(false),
        }
    }

    /// モニターを追加（開始前のみ）
    pub fn add_monitor(&mut self, monitor: Arc<dyn Monitor>) -> Result<()> {
        if self.is_started() {
            return Err(TelemetryError::AlreadyRunning(HUB_TASK.to_string()));
        }
        if self.runners.iter().any(|r| r.name() == monitor.name()) {
            return Err(TelemetryError::InvalidInput(format!(
                "monitor '{}' added twice",
                monitor.name()
            )));
        }
        self.runners
            .push(MonitorRunner::new(monitor, Arc::clone(&self.registry)));
        Ok(())
    }

    /// `monitors.security` の設定でセキュリティモニターを追加
    ///
    /// 無効化されている場合は追加せず `false` を返す。
    pub fn add_security_monitor(&mut self, scanner: Arc<dyn SecurityScanner>) -> Result<bool> {
        let settings = self.config.monitors.security.clone();
        self.add_configured("security", &settings, || {
            Arc::new(SecurityMonitor::new(scanner, settings.interval())) as Arc<dyn Monitor>
        })
    }

    /// `monitors.compliance` の設定でコンプライアンスモニターを追加
    pub fn add_compliance_monitor(&mut self, checks: Vec<ComplianceCheck>) -> Result<bool> {
        let settings = self.config.monitors.compliance.clone();
        self.add_configured("compliance", &settings, || {
            Arc::new(ComplianceMonitor::new(checks, settings.interval())) as Arc<dyn Monitor>
        })
    }

    /// `monitors.anomaly` の設定で異常検知モニターを追加
    pub fn add_anomaly_monitor<I, S>(&mut self, watched: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let settings = self.config.monitors.anomaly.clone();
        self.add_configured("anomaly", &settings, || {
            Arc::new(AnomalyMonitor::new(watched, settings.interval())) as Arc<dyn Monitor>
        })
    }

    /// `monitors.audit` の設定で外部監査モニターを追加
    pub fn add_audit_monitor(&mut self, runner: Arc<dyn AuditRunner>) -> Result<bool> {
        let settings = self.config.monitors.audit.clone();
        self.add_configured("audit", &settings, || {
            Arc::new(AuditMonitor::new(runner, settings.interval())) as Arc<dyn Monitor>
        })
    }

    fn add_configured<F>(&mut self, key: &str, settings: &MonitorSettings, build: F) -> Result<bool>
    where
        F: FnOnce() -> Arc<dyn Monitor>,
    {
        if !settings.enabled {
            info!(monitor = key, "Monitor disabled by configuration");
            return Ok(false);
        }
        self.add_monitor(build())?;
        Ok(true)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn exporter(&self) -> &MetricsExporter {
        &self.exporter
    }

    pub fn dashboard(&self) -> DashboardManager {
        DashboardManager::new(Arc::clone(&self.registry))
    }

    /// 追加済みモニター名
    pub fn monitors(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.name()).collect()
    }

    pub fn runner(&self, name: &str) -> Option<&MonitorRunner> {
        self.runners.iter().find(|r| r.name() == name)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 全モニターとエクスポートループを開始
    ///
    /// 途中で失敗した場合は開始済みのタスクを止めてエラーを返す。
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyRunning(HUB_TASK.to_string()));
        }

        if let Err(e) = self.start_tasks().await {
            self.stop_tasks();
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            monitors = self.runners.len(),
            export = self.exporter.is_running(),
            "Telemetry hub started"
        );
        Ok(())
    }

    async fn start_tasks(&self) -> Result<()> {
        for runner in &self.runners {
            runner.start().await?;
        }
        if self.config.export.destination().is_some() {
            self.exporter.start_loop(self.config.export.interval())?;
        }
        Ok(())
    }

    fn stop_tasks(&self) {
        for runner in self.runners.iter().filter(|r| r.is_running()) {
            if let Err(e) = runner.stop() {
                warn!(monitor = %runner.name(), error = %e, "Failed to stop monitor");
            }
        }
        if self.exporter.is_running() {
            if let Err(e) = self.exporter.stop_loop() {
                warn!(error = %e, "Failed to stop export loop");
            }
        }
    }

    /// 全タスクを停止（実行中の収集は待たない）
    pub fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(TelemetryError::NotRunning(HUB_TASK.to_string()));
        }
        self.stop_tasks();
        info!("Telemetry hub stopped");
        Ok(())
    }

    /// 全タスクを停止し、実行中の収集とエクスポートの完了を待つ
    ///
    /// エクスポートが有効なら最後に1回送信する。
    pub async fn shutdown(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(TelemetryError::NotRunning(HUB_TASK.to_string()));
        }

        // 各モニターの実行中の収集を並行して待つ
        let running: Vec<&MonitorRunner> = self.runners.iter().filter(|r| r.is_running()).collect();
        let results = join_all(running.iter().map(|r| r.shutdown())).await;
        for (runner, result) in running.iter().zip(results) {
            if let Err(e) = result {
                warn!(monitor = %runner.name(), error = %e, "Failed to shut down monitor");
            }
        }

        if self.exporter.is_running() {
            self.exporter.shutdown().await?;
            if let Err(e) = self.exporter.export().await {
                warn!(error = %e, "Final metrics export failed");
            }
        }

        info!("Telemetry hub shut down");
        Ok(())
    }
}
