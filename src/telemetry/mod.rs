//! テレメトリレジストリ
//!
//! メトリクスの登録・記録・集計、閾値アラート、定期収集タスク、
//! スナップショットとエクスポートを提供します。

pub mod alerts;
pub mod collector;
pub mod dashboard;
pub mod detector;
pub mod exporter;
pub mod metrics;
pub mod registry;
pub mod snapshot;

pub use alerts::{AlertEvent, AlertHandler, AlertMode, FnAlertHandler, LogAlertHandler};
pub use collector::{PeriodicCollector, StartPolicy};
pub use dashboard::DashboardManager;
pub use detector::AnomalyDetector;
pub use exporter::{ExportConfig, ExportSink, HttpExportSink, MetricsExporter};
pub use metrics::{MetricDefinition, MetricKind, MetricStats, SamplePoint};
pub use registry::{DuplicatePolicy, MetricRegistry, RegistryConfig};
pub use snapshot::{ExportRecord, MetricSnapshot, Snapshot};
