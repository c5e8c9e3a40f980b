//! 外部監査の自動実行モニター
//!
//! 外部ツール（Lighthouse など）の実行結果をカテゴリ別スコアとして記録する。
//! カテゴリはツール側が決めるため、メトリクスは初回記録時に遅延登録する。

use super::{ensure_registered, Monitor, MonitorSchedule};
use crate::error::Result;
use crate::telemetry::collector::StartPolicy;
use crate::telemetry::metrics::{MetricDefinition, MetricKind};
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const METRIC_AUDIT_OVERALL: &str = "audit_overall_score";

/// 監査結果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditReport {
    /// カテゴリ → スコア（0-100）
    pub scores: BTreeMap<String, f64>,
}

impl AuditReport {
    pub fn overall(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.values().sum::<f64>() / self.scores.len() as f64)
        }
    }
}

/// 外部監査ツールの実行
#[async_trait]
pub trait AuditRunner: Send + Sync {
    async fn run(&self) -> Result<AuditReport>;
}

/// 監査モニター
pub struct AuditMonitor {
    runner: Arc<dyn AuditRunner>,
    interval: Duration,
}

impl AuditMonitor {
    pub fn new(runner: Arc<dyn AuditRunner>, interval: Duration) -> Self {
        Self { runner, interval }
    }

    /// カテゴリのメトリクス名
    pub fn category_metric(category: &str) -> String {
        let slug: String = category
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("audit_{}_score", slug)
    }
}

#[async_trait]
impl Monitor for AuditMonitor {
    fn name(&self) -> &str {
        "external_audit"
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
            MetricDefinition::new(METRIC_AUDIT_OVERALL, MetricKind::Score)
                .with_description("Mean score across audit categories")
                .with_tag("audit"),
        )
        .await
    }

    async fn collect(&self, registry: &MetricRegistry) -> Result<()> {
        let report = self.runner.run().await?;

        for (category, score) in &report.scores {
            let definition = MetricDefinition::new(Self::category_metric(category), MetricKind::Score)
                .with_description(format!("Audit score for {}", category))
                .with_tag("audit");
            registry.record_or_register(&definition, *score).await?;
        }

        if let Some(overall) = report.overall() {
            registry.record(METRIC_AUDIT_OVERALL, overall).await?;
            info!(categories = report.scores.len(), overall, "External audit completed");
        }
        Ok(())
    }
}
