//! webmon - ウェブサイト死活監視パイプライン
//!
//! Publisher がターゲットをチェックしてメッセージバスへ送信し、
//! Consumer が受信したイベントをリレーショナルDBへ永続化する。

#![warn(missing_docs)]

/// メッセージバス（NATS JetStream / プロセス内）
pub mod bus;

/// CLI定義
pub mod cli;

/// 環境変数ヘルパー
pub mod config;

/// ヘルスイベントConsumer
pub mod consumer;

/// データベースアクセス層
pub mod db;

/// エラー型
pub mod error;

/// ヘルスチェック
pub mod health;

/// ログ初期化
pub mod logging;

/// ヘルスイベントPublisher
pub mod publisher;

/// 協調シャットダウン
pub mod shutdown;

pub use consumer::{ConsumeSummary, EventConsumer};
pub use publisher::{PublishSummary, Publisher};
