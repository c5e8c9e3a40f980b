use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use telemetry_registry::config::TelemetryConfig;
use telemetry_registry::logging::{init_logging, LogConfig, LogFormat};
use telemetry_registry::monitors::compliance::METRIC_COMPLIANCE_SCORE;
use telemetry_registry::monitors::{ComplianceCheck, SecurityFinding, SecurityScanner, Severity};
use telemetry_registry::telemetry::LogAlertHandler;
use telemetry_registry::TelemetryHub;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "telemetryd", version, about = "In-process telemetry registry daemon")]
struct Cli {
    /// 設定ファイル（未指定ならカレントディレクトリの telemetry.toml を任意で読む）
    #[arg(short, long, env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// ログレベル（設定ファイルより優先）
    #[arg(long)]
    log_level: Option<String>,

    /// JSON 形式でログを出力
    #[arg(long)]
    json_logs: bool,
}

/// 設定自体の健全性を検査するチェック群
fn config_checks(config: &TelemetryConfig) -> Vec<ComplianceCheck> {
    let endpoint = config.export.destination().map(str::to_owned);
    let log_dir = config.logging.log_dir.clone();

    vec![
        ComplianceCheck::new("export_uses_tls", move || {
            endpoint
                .as_deref()
                .map_or(true, |e| e.starts_with("https://"))
        }),
        ComplianceCheck::new("persistent_logs", move || log_dir.is_some()),
    ]
}

/// 設定内容から検出事項を洗い出すスキャナー
struct ConfigScanner {
    config: TelemetryConfig,
}

#[async_trait]
impl SecurityScanner for ConfigScanner {
    async fn scan(&self) -> telemetry_registry::Result<Vec<SecurityFinding>> {
        let mut findings = Vec::new();
        if let Some(endpoint) = self.config.export.destination() {
            if endpoint.starts_with("http://") {
                findings.push(SecurityFinding::new(
                    "CFG-1",
                    "Metrics are exported over plaintext HTTP",
                    Severity::High,
                ));
            }
        }
        if matches!(self.config.logging.level.as_str(), "debug" | "trace") {
            findings.push(SecurityFinding::new(
                "CFG-2",
                "Verbose logging may expose metric payloads",
                Severity::Low,
            ));
        }
        Ok(findings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TelemetryConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = LogConfig::from(&config.logging);
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(level.clone());
    }
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    let _log_guard = init_logging(&log_config)?;

    let mut hub = TelemetryHub::new(config.clone())?;
    hub.registry()
        .set_alert_handler(Arc::new(LogAlertHandler))
        .await;

    hub.add_security_monitor(Arc::new(ConfigScanner {
        config: config.clone(),
    }))?;
    hub.add_compliance_monitor(config_checks(&config))?;
    hub.add_anomaly_monitor([METRIC_COMPLIANCE_SCORE])?;
    if config.monitors.audit.enabled {
        // 監査ランナーはライブラリ利用側が `add_audit_monitor` で渡す
        warn!("monitors.audit is enabled but telemetryd has no audit runner, skipping");
    }

    hub.start().await?;
    info!(monitors = ?hub.monitors(), "telemetryd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    hub.shutdown().await?;

    let snapshot = hub.registry().snapshot().await;
    info!(
        metrics = snapshot.len(),
        alerting = ?snapshot.alerting(),
        alerts_fired = hub.registry().alerts_fired(),
        alerts_dropped = hub.registry().alerts_dropped(),
        "telemetryd stopped"
    );
    Ok(())
}
