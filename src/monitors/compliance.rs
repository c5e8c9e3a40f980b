//! コンプライアンスチェックモニター

use super::{ensure_registered, Monitor, MonitorSchedule};
use crate::error::{Result, TelemetryError};
use crate::telemetry::collector::StartPolicy;
use crate::telemetry::metrics::{MetricDefinition, MetricKind};
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const METRIC_COMPLIANCE_SCORE: &str = "compliance_score";
pub const METRIC_FAILED_CHECKS: &str = "compliance_failed_checks";

type CheckFn = dyn Fn() -> bool + Send + Sync;

/// 名前付きのチェック
#[derive(Clone)]
pub struct ComplianceCheck {
    name: String,
    check: Arc<CheckFn>,
}

impl ComplianceCheck {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> bool {
        (self.check)()
    }
}

impl std::fmt::Debug for ComplianceCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 直近のチェック結果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub results: BTreeMap<String, bool>,
    pub score: f64,
}

impl ComplianceReport {
    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// コンプライアンスモニター
pub struct ComplianceMonitor {
    checks: Vec<ComplianceCheck>,
    interval: Duration,
    last_report: RwLock<ComplianceReport>,
}

impl ComplianceMonitor {
    pub fn new(checks: Vec<ComplianceCheck>, interval: Duration) -> Self {
        Self {
            checks,
            interval,
            last_report: RwLock::new(ComplianceReport::default()),
        }
    }

    pub async fn last_report(&self) -> ComplianceReport {
        self.last_report.read().await.clone()
    }

    fn evaluate(&self) -> ComplianceReport {
        let results: BTreeMap<String, bool> = self
            .checks
            .iter()
            .map(|check| (check.name().to_string(), check.run()))
            .collect();
        let passed = results.values().filter(|passed| **passed).count();
        let score = passed as f64 / results.len() as f64 * 100.0;
        ComplianceReport { results, score }
    }
}

#[async_trait]
impl Monitor for ComplianceMonitor {
    fn name(&self) -> &str {
        "compliance_check"
    }

    fn schedule(&self) -> MonitorSchedule {
        MonitorSchedule {
            interval: self.interval,
            policy: StartPolicy::Immediate,
        }
    }

    async fn register(&self, registry: &MetricRegistry) -> Result<()> {
        ensure_registered(
            registry,
            MetricDefinition::new(METRIC_COMPLIANCE_SCORE, MetricKind::Percentage)
                .with_description("Share of passing compliance checks")
                .with_tag("compliance"),
        )
        .await?;
        ensure_registered(
            registry,
            MetricDefinition::new(METRIC_FAILED_CHECKS, MetricKind::Count)
                .with_description("Number of failing compliance checks")
                .with_threshold(1.0)
                .with_tag("compliance"),
        )
        .await
    }

    async fn collect(&self, registry: &MetricRegistry) -> Result<()> {
        if self.checks.is_empty() {
            return Err(TelemetryError::Collection(
                "no compliance checks configured".to_string(),
            ));
        }

        let report = self.evaluate();
        let failed = report.failed();

        registry.record(METRIC_COMPLIANCE_SCORE, report.score).await?;
        registry
            .record(METRIC_FAILED_CHECKS, failed.len() as f64)
            .await?;

        if failed.is_empty() {
            info!(score = report.score, "Compliance checks passed");
        } else {
            warn!(score = report.score, failed = ?failed, "Compliance checks failed");
        }

        *self.last_report.write().await = report;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compliance_score() {
        let registry = MetricRegistry::default();
        let monitor = ComplianceMonitor::new(
            vec![
                ComplianceCheck::new("https_only", || true),
                ComplianceCheck::new("cookie_consent", || true),
                ComplianceCheck::new("data_retention_policy", || false),
                ComplianceCheck::new("audit_logging", || true),
            ],
            Duration::from_secs(600),
        );

        monitor.register(&registry).await.unwrap();
        monitor.collect(&registry).await.unwrap();

        assert_eq!(registry.latest(METRIC_COMPLIANCE_SCORE).await.unwrap(), Some(75.0));
        assert_eq!(registry.latest(METRIC_FAILED_CHECKS).await.unwrap(), Some(1.0));
        assert!(registry.is_alerting(METRIC_FAILED_CHECKS).await.unwrap());

        let report = monitor.last_report().await;
        assert_eq!(report.failed(), vec!["data_retention_policy"]);
    }

    #[tokio::test]
    async fn test_no_checks_is_collection_error() {
        let registry = MetricRegistry::default();
        let monitor = ComplianceMonitor::new(Vec::new(), Duration::from_secs(600));
        monitor.register(&registry).await.unwrap();

        let err = monitor.collect(&registry).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Collection(_)));
    }
}
