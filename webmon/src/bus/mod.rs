//! メッセージバス
//!
//! Publisherが送信し、Consumerが購読するトピック型チャネルの抽象。
//! 本番はNATS JetStream、組み込み・テスト用にプロセス内実装を持つ。
//!
//! 配信保証は at-least-once。Consumerは永続化に成功してから `ack` し、
//! 失敗時は `nak` で再配信を要求する。

/// プロセス内バス
pub mod memory;
/// NATS JetStream バス
pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BusError;

pub use memory::MemoryBus;
pub use nats::NatsBus;

/// イベント送信側
#[async_trait]
pub trait EventSink: Send + Sync {
    /// トピックへ送信する
    ///
    /// ブローカーが受領を確認するまで戻らない。
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;
}

/// 受信メッセージの受領確認
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// 処理完了（再配信しない）
    async fn ack(&self) -> Result<(), BusError>;
    /// 処理失敗（再配信を要求）
    async fn nak(&self) -> Result<(), BusError>;
    /// 処理不能（再配信しない）
    async fn term(&self) -> Result<(), BusError>;
}

/// 受信した1メッセージ
pub struct Delivery {
    payload: Bytes,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// 新しい受信メッセージを作成
    pub fn new(payload: Bytes, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    /// ペイロード
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 処理完了を通知
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    /// 再配信を要求
    pub async fn nak(self) -> Result<(), BusError> {
        self.acker.nak().await
    }

    /// 再配信せずに破棄
    pub async fn term(self) -> Result<(), BusError> {
        self.acker.term().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// イベント受信側（購読）
#[async_trait]
pub trait EventSource: Send {
    /// 次のメッセージを待つ
    ///
    /// 購読が終了した場合は `None`。
    async fn recv(&mut self) -> Option<Result<Delivery, BusError>>;

    /// 購読を解除する
    async fn close(&mut self) -> Result<(), BusError>;
}
