//! エラー型定義
//!
//! 1件単位で回復するエラー（ターゲット1件・メッセージ1件）と、
//! プロセスを終了させる起動時エラーを別の型に分ける。

use thiserror::Error;
use webmon_common::CommonError;

/// ターゲットへの到達失敗（DNS、接続拒否、タイムアウト、TLS、本文読み込み）
///
/// ヘルスチェッカー内で回復され、全フィールド欠損の結果になる。
#[derive(Debug, Error)]
#[error("Transport error for {url}: {source}")]
pub struct TransportError {
    /// チェック対象URL
    pub url: String,
    /// 原因
    #[source]
    pub source: reqwest::Error,
}

/// メッセージバス操作のエラー
#[derive(Debug, Error)]
pub enum BusError {
    /// ブローカーへの接続失敗
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    /// ストリームの準備失敗
    #[error("Failed to prepare stream: {0}")]
    Stream(String),

    /// 購読失敗
    #[error("Failed to subscribe: {0}")]
    Subscribe(String),

    /// 送信失敗（ブローカーの受領確認なし）
    #[error("Failed to publish: {0}")]
    Publish(String),

    /// 受信失敗
    #[error("Failed to receive: {0}")]
    Receive(String),

    /// 受領確認（ack/nak/term）の送信失敗
    #[error("Failed to acknowledge: {0}")]
    Ack(String),
}

/// イベントストア操作のエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// 接続設定が不正
    #[error("Invalid store configuration: {0}")]
    Config(String),

    /// 接続失敗
    #[error("Failed to connect to store: {0}")]
    Connect(#[source] sqlx::Error),

    /// テーブル作成失敗
    #[error("Failed to ensure events table: {0}")]
    Schema(#[source] sqlx::Error),

    /// 挿入またはコミット失敗
    #[error("Failed to insert event: {0}")]
    Insert(#[source] sqlx::Error),

    /// 読み出し失敗
    #[error("Failed to query events: {0}")]
    Query(#[source] sqlx::Error),

    /// 保存済みの行がイベントとして復元できない
    #[error("Corrupt event row: {0}")]
    Corrupt(String),
}

/// 起動時エラー（プロセスを非ゼロ終了させる）
#[derive(Debug, Error)]
pub enum StartupError {
    /// 設定の読み込み・検証失敗
    #[error(transparent)]
    Config(#[from] CommonError),

    /// ブローカーに接続・購読できない
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[source] BusError),

    /// ストアに接続できない、またはテーブルを作成できない
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// ログ初期化失敗
    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl From<BusError> for StartupError {
    fn from(err: BusError) -> Self {
        Self::BrokerUnavailable(err)
    }
}

impl From<StoreError> for StartupError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err)
    }
}
