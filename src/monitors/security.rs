//! セキュリティスキャンモニター
//!
//! 開始直後に1回スキャンし、以降は間隔ごとに実行する。

use super::{ensure_registered, Monitor, MonitorSchedule};
use crate::error::Result;
use crate::telemetry::collector::StartPolicy;
use crate::telemetry::metrics::{MetricDefinition, MetricKind};
use crate::telemetry::registry::MetricRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const METRIC_SECURITY_SCORE: &str = "security_score";
pub const METRIC_FINDINGS_CRITICAL: &str = "security_findings_critical";
pub const METRIC_FINDINGS_HIGH: &str = "security_findings_high";
pub const METRIC_FINDINGS_MEDIUM: &str = "security_findings_medium";
pub const METRIC_FINDINGS_LOW: &str = "security_findings_low";

/// 深刻度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// スコアからの減点
    pub fn penalty(&self) -> f64 {
        match self {
            Self::Critical => 25.0,
            Self::High => 10.0,
            Self::Medium => 5.0,
            Self::Low => 1.0,
        }
    }
}

/// スキャン結果の1件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityFinding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
}

impl SecurityFinding {
    pub fn new(id: impl Into<String>, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity,
        }
    }
}

/// 検出結果のソース
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<SecurityFinding>>;
}

/// セキュリティモニター
pub struct SecurityMonitor {
    scanner: Arc<dyn SecurityScanner>,
    interval: Duration,
    last_findings: RwLock<Vec<SecurityFinding>>,
}

impl SecurityMonitor {
    pub fn new(scanner: Arc<dyn SecurityScanner>, interval: Duration) -> Self {
        Self {
            scanner,
            interval,
            last_findings: RwLock::new(Vec::new()),
        }
    }

    /// 直近のスキャン結果
    pub async fn last_findings(&self) -> Vec<SecurityFinding> {
        self.last_findings.read().await.clone()
    }

    /// 検出結果からスコア（0-100）を計算
    pub fn score(findings: &[SecurityFinding]) -> f64 {
        let penalty: f64 = findings.iter().map(|f| f.severity.penalty()).sum();
        (100.0 - penalty).max(0.0)
    }

    fn count(findings: &[SecurityFinding], severity: Severity) -> f64 {
        findings.iter().filter(|f| f.severity == severity).count() as f64
    }
}

#[async_trait]
impl Monitor for SecurityMonitor {
    fn name(&self) -> &str {
        "security_scan"
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
            MetricDefinition::new(METRIC_SECURITY_SCORE, MetricKind::Score)
                .with_description("Security score derived from scan findings")
                .with_tag("security"),
        )
        .await?;
        ensure_registered(
            registry,
            MetricDefinition::new(METRIC_FINDINGS_CRITICAL, MetricKind::Count)
                .with_description("Critical security findings")
                .with_threshold(1.0)
                .with_tag("security"),
        )
        .await?;

        for (name, description) in [
            (METRIC_FINDINGS_HIGH, "High severity security findings"),
            (METRIC_FINDINGS_MEDIUM, "Medium severity security findings"),
            (METRIC_FINDINGS_LOW, "Low severity security findings"),
        ] {
            ensure_registered(
                registry,
                MetricDefinition::new(name, MetricKind::Count)
                    .with_description(description)
                    .with_tag("security"),
            )
            .await?;
        }
        Ok(())
    }

    async fn collect(&self, registry: &MetricRegistry) -> Result<()> {
        let findings = self.scanner.scan().await?;

        let critical = Self::count(&findings, Severity::Critical);
        registry.record(METRIC_FINDINGS_CRITICAL, critical).await?;
        registry
            .record(METRIC_FINDINGS_HIGH, Self::count(&findings, Severity::High))
            .await?;
        registry
            .record(METRIC_FINDINGS_MEDIUM, Self::count(&findings, Severity::Medium))
            .await?;
        registry
            .record(METRIC_FINDINGS_LOW, Self::count(&findings, Severity::Low))
            .await?;

        let score = Self::score(&findings);
        registry.record(METRIC_SECURITY_SCORE, score).await?;

        if critical > 0.0 {
            warn!(critical, score, "Security scan reported critical findings");
        } else {
            info!(findings = findings.len(), score, "Security scan completed");
        }

        *self.last_findings.write().await = findings;
        Ok(())
    }
}
