use crate::error::{Result, TelemetryError};
use crate::monitors::MonitorSettings;
use crate::telemetry::exporter::ExportConfig;
use crate::telemetry::registry::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// 既定の設定ファイル名（拡張子なし）
const DEFAULT_CONFIG_NAME: &str = "telemetry";

/// 環境変数のプレフィックス（例: `TELEMETRY__EXPORT__ENABLED=true`）
const ENV_PREFIX: &str = "TELEMETRY";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub registry: RegistryConfig,
    pub export: ExportConfig,
    pub monitors: MonitorsConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MonitorsConfig {
    pub security: MonitorSettings,
    pub compliance: MonitorSettings,
    pub anomaly: MonitorSettings,
    pub audit: MonitorSettings,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            security: MonitorSettings::new(true, 3600),
            compliance: MonitorSettings::new(true, 600),
            anomaly: MonitorSettings::new(true, 60),
            audit: MonitorSettings::new(false, 3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

impl TelemetryConfig {
    /// 設定ファイルから読み込み、環境変数で上書き
    ///
    /// `path` が `None` の場合はカレントディレクトリの `telemetry.*` を任意で読む。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&TelemetryConfig::default())?);

        settings = match path {
            Some(path) => {
                info!("Loading telemetry config from {}", path.display());
                settings.add_source(config::File::from(path))
            }
            None => settings.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        settings = settings.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: TelemetryConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        if self.registry.alert_queue_capacity == 0 {
            return Err(TelemetryError::InvalidInput(
                "registry.alert_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(threshold) = self.registry.default_threshold {
            if !threshold.is_finite() {
                return Err(TelemetryError::InvalidInput(
                    "registry.default_threshold must be finite".to_string(),
                ));
            }
        }
        if self.export.enabled && self.export.interval_secs == 0 {
            return Err(TelemetryError::InvalidInput(
                "export.interval_secs must be greater than zero".to_string(),
            ));
        }

        for (name, settings) in [
            ("security", &self.monitors.security),
            ("compliance", &self.monitors.compliance),
            ("anomaly", &self.monitors.anomaly),
            ("audit", &self.monitors.audit),
        ] {
            if settings.enabled && settings.interval_secs == 0 {
                return Err(TelemetryError::InvalidInput(format!(
                    "monitors.{}.interval_secs must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::registry::DuplicatePolicy;
    use crate::telemetry::alerts::AlertMode;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.export.enabled);
        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.registry.alert_mode, AlertMode::Level);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[registry]
duplicate_policy = "replace"
default_threshold = 95.0
alert_mode = "edge"

[export]
enabled = true
endpoint = "http://localhost:9091/metrics"
interval_secs = 15

[monitors.compliance]
interval_secs = 120
"#,
        );

        let config = TelemetryConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(config.registry.default_threshold, Some(95.0));
        assert_eq!(config.registry.alert_mode, AlertMode::Edge);
        assert_eq!(
            config.export.destination(),
            Some("http://localhost:9091/metrics")
        );
        assert_eq!(config.export.interval_secs, 15);
        assert_eq!(config.monitors.compliance.interval_secs, 120);
        // 未指定の値は既定値のまま
        assert_eq!(config.monitors.security.interval_secs, 3600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TELEMETRY__MONITORS__AUDIT__INTERVAL_SECS", "42");
        let file = write_config("");
        let config = TelemetryConfig::load(Some(file.path()));
        std::env::remove_var("TELEMETRY__MONITORS__AUDIT__INTERVAL_SECS");

        assert_eq!(config.unwrap().monitors.audit.interval_secs, 42);
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let file = write_config("[registry]\nalert_queue_capacity = 0\n");
        let err = TelemetryConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidInput(_)));
    }

    #[test]
    fn test_zero_monitor_interval_rejected() {
        let mut config = TelemetryConfig::default();
        config.monitors.anomaly.interval_secs = 0;
        assert!(config.validate().is_err());

        config.monitors.anomaly.enabled = false;
        assert!(config.validate().is_ok());
    }
}
