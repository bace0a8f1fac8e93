//! ログ初期化
//!
//! コンソール出力に加え、`WEBMON_LOG_DIR` が設定されていれば日次ローテーションの
//! ファイルにも書き出す。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config;
use crate::error::StartupError;

/// ログファイル名のプレフィックス（`webmon.log.YYYY-MM-DD`）
pub const LOG_FILE_NAME: &str = "webmon.log";

const DEFAULT_LOG_LEVEL: &str = "info";

/// ログを初期化する
///
/// ファイル出力を有効にした場合は `WorkerGuard` を返す。プロセス終了まで保持すること。
pub fn init(debug: bool) -> Result<Option<WorkerGuard>, StartupError> {
    let directive = filter_directive(
        debug,
        config::log_level(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive).map_err(|e| {
        StartupError::Logging(format!("invalid log filter '{}': {}", directive, e))
    })?;

    let (file_layer, guard) = match config::log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir).map_err(|e| {
                StartupError::Logging(format!(
                    "failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| StartupError::Logging(e.to_string()))?;

    Ok(guard)
}

/// フィルタ指定を決める
///
/// 優先順位: `--debug` > `WEBMON_LOG_LEVEL`（旧: `LOG_LEVEL`）> `RUST_LOG` > info
fn filter_directive(debug: bool, level: Option<String>, rust_log: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    level
        .or(rust_log)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}
