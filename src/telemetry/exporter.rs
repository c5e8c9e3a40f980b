//! メトリクスエクスポート
//!
//! スナップショットを JSON にシリアライズし、設定されたエンドポイントへ送る。
//! 無効化されている、または送信先が未設定の場合は何もせず成功を返す。

use crate::error::{Result, TelemetryError};
use crate::telemetry::collector::{PeriodicCollector, StartPolicy};
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// エクスポート設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// エクスポート有効化
    pub enabled: bool,
    /// 送信先（不透明な文字列）
    pub endpoint: Option<String>,
    /// エクスポート間隔（秒）
    pub interval_secs: u64,
    /// 送信タイムアウト（秒）
    pub timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            interval_secs: 60,
            timeout_secs: 10,
        }
    }
}

impl ExportConfig {
    /// 送信先が有効か
    pub fn destination(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// エクスポート送信先
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// ペイロードを送信
    async fn send(&self, endpoint: &str, payload: Vec<u8>) -> Result<()>;
}

/// HTTP POST で送信するシンク
pub struct HttpExportSink {
    client: reqwest::Client,
}

impl HttpExportSink {
    /// 新しい HTTP シンクを作成
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExportSink for HttpExportSink {
    async fn send(&self, endpoint: &str, payload: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            Err(TelemetryError::Export(format!(
                "endpoint returned {} - {}",
                status, error_text
            )))
        }
    }
}

struct ExportPipeline {
    registry: Arc<MetricRegistry>,
    config: ExportConfig,
    sink: Arc<dyn ExportSink>,
    exports: AtomicU64,
}

impl ExportPipeline {
    async fn render(&self) -> Result<Vec<u8>> {
        self.registry.snapshot().await.to_json_bytes()
    }

    async fn export(&self) -> Result<Option<Vec<u8>>> {
        let Some(endpoint) = self.config.destination() else {
            debug!("Export disabled or no endpoint configured, skipping");
            return Ok(None);
        };

        let payload = self.render().await?;
        self.sink.send(endpoint, payload.clone()).await?;
        self.exports.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint, bytes = payload.len(), "Exported metrics snapshot");
        Ok(Some(payload))
    }
}

/// メトリクスエクスポーター
pub struct MetricsExporter {
    pipeline: Arc<ExportPipeline>,
    task: PeriodicCollector,
}

impl MetricsExporter {
    /// HTTP シンクでエクスポーターを作成
    pub fn new(registry: Arc<MetricRegistry>, config: ExportConfig) -> Result<Self> {
        let sink = Arc::new(HttpExportSink::new(config.timeout())?);
        Ok(Self::with_sink(registry, config, sink))
    }

    /// 任意のシンクでエクスポーターを作成
    pub fn with_sink(
        registry: Arc<MetricRegistry>,
        config: ExportConfig,
        sink: Arc<dyn ExportSink>,
    ) -> Self {
        Self {
            pipeline: Arc::new(ExportPipeline {
                registry,
                config,
                sink,
                exports: AtomicU64::new(0),
            }),
            task: PeriodicCollector::new("metrics_export"),
        }
    }

    /// 設定を取得
    pub fn config(&self) -> &ExportConfig {
        &self.pipeline.config
    }

    /// 送信せずにシリアライズのみ行う
    pub async fn render(&self) -> Result<Vec<u8>> {
        self.pipeline.render().await
    }

    /// スナップショットを送信
    ///
    /// 送信した場合はペイロードを返す。無効時は `Ok(None)`。
    pub async fn export(&self) -> Result<Option<Vec<u8>>> {
        self.pipeline.export().await
    }

    /// 成功したエクスポート数
    pub fn exports(&self) -> u64 {
        self.pipeline.exports.load(Ordering::Relaxed)
    }

    /// 定期エクスポートを開始
    pub fn start_loop(&self, interval: Duration) -> Result<()> {
        let pipeline = Arc::clone(&self.pipeline);
        self.task.start(interval, StartPolicy::AfterInterval, move || {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.export().await.map(|_| ()) }
        })?;
        info!(
            enabled = self.pipeline.config.destination().is_some(),
            "Metrics export loop started"
        );
        Ok(())
    }

    /// 定期エクスポートを停止
    pub fn stop_loop(&self) -> Result<()> {
        self.task.stop()
    }

    /// 停止して実行中のエクスポートを待つ
    pub async fn shutdown(&self) -> Result<()> {
        self.task.shutdown().await
    }

    /// ループが実行中か
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
