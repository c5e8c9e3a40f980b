use crate::config::LoggingSettings;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// ログファイル名のプレフィックス
const LOG_FILE_PREFIX: &str = "telemetryd.log";

/// ログ設定
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) または EnvFilter 構文
    pub level: String,
    /// 出力形式
    pub format: LogFormat,
    /// コンソール出力有効
    pub console: bool,
    /// ファイル出力先ディレクトリ（`None` ならファイル出力なし）
    pub log_dir: Option<PathBuf>,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 人間向けの整形出力
    Pretty,
    /// 1行1イベントの JSON
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            console: true,
            log_dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            format: if settings.json {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            log_dir: settings.log_dir.clone(),
            ..Self::default()
        }
    }
}

impl LogConfig {
    /// ログレベルを上書き
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// ローテーション設定
    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// レベル文字列から EnvFilter を作成（不正な場合は info）
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn file_appender(dir: &Path, rotation: LogRotation) -> rolling::RollingFileAppender {
    match rotation {
        LogRotation::Daily => rolling::daily(dir, LOG_FILE_PREFIX),
        LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_PREFIX),
        LogRotation::Never => rolling::never(dir, LOG_FILE_PREFIX),
    }
}

/// ログシステムを初期化
///
/// ファイル出力を有効にした場合は non-blocking writer のガードを返す。
/// ガードを破棄するとバッファ済みのログが書き出されなくなるため、
/// 呼び出し側はプロセス終了まで保持すること。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);
        layers.push(match config.format {
            LogFormat::Pretty => console.boxed(),
            LogFormat::Json => console.json().boxed(),
        });
    }

    let mut guard = None;
    if let Some(dir) = &config.log_dir {
        ensure_log_dir(dir)?;
        let (writer, file_guard) = non_blocking(file_appender(dir, config.rotation));
        let file = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        layers.push(match config.format {
            LogFormat::Pretty => file.boxed(),
            LogFormat::Json => file.json().boxed(),
        });
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.env_filter())
        .try_init()?;

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        log_dir = ?config.log_dir,
        "Logging initialized"
    );

    Ok(guard)
}
