//! エラー型定義
//!
//! 統一エラー型（thiserror使用）

use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<config::ConfigError> for CommonError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// ヘルスイベントのデコード失敗
///
/// ペイロードが期待する構造でない場合に返す。部分的な復元は行わない。
#[derive(Debug, Error)]
pub enum MalformedEventError {
    /// JSONとして解釈できない、または型が一致しない
    #[error("Malformed event payload: {0}")]
    Syntax(#[from] serde_json::Error),

    /// フィールド値が不変条件を満たさない
    #[error("Malformed event field: {0}")]
    Field(String),
}
