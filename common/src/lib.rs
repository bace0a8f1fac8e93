//! webmon 共通クレート
//!
//! Publisher / Consumer の両プロセスで共有するデータ型・コーデック・設定

#![warn(missing_docs)]

/// 設定構造体と読み込み
pub mod config;

/// エラー型
pub mod error;

/// ヘルスイベントのワイヤーフォーマット（エンコード/デコード）
pub mod protocol;

/// コアデータ型
pub mod types;

pub use error::{CommonError, MalformedEventError};
pub use types::{CheckResult, HealthEvent, Measurement, StoredEvent};
