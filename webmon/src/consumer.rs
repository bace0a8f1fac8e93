//! ヘルスイベントConsumer
//!
//! 購読したメッセージを1件ずつデコードしてストアへ挿入・コミットし、
//! コミット後にackする。1件の失敗でループは止まらない。
//! 終了時は購読とストア接続を必ず閉じる。

use std::time::Duration;

use tracing::{error, info, warn};
use webmon_common::protocol;

use crate::bus::{Delivery, EventSource};
use crate::db::EventStore;
use crate::shutdown::ShutdownController;

/// 受信エラー後に次の受信を試みるまでの待ち時間
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// ログに載せる不正ペイロードの最大バイト数
const PAYLOAD_PREVIEW_LEN: usize = 256;

/// Consumerの処理結果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// 受信したメッセージ数
    pub received: usize,
    /// 永続化してackしたイベント数
    pub inserted: usize,
    /// デコードできずに破棄したメッセージ数
    pub malformed: usize,
    /// 永続化に失敗して再配信を要求したメッセージ数
    pub failed: usize,
}

/// ヘルスイベントConsumer
pub struct EventConsumer {
    store: Box<dyn EventStore>,
    source: Box<dyn EventSource>,
    shutdown: ShutdownController,
}

impl EventConsumer {
    /// 新しいConsumerを作成
    ///
    /// ストアのテーブルは作成済みであること（`EventStore::ensure_schema`）。
    pub fn new(
        store: Box<dyn EventStore>,
        source: Box<dyn EventSource>,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            store,
            source,
            shutdown,
        }
    }

    /// シャットダウン要求または購読終了まで処理を続ける
    pub async fn run(mut self) -> ConsumeSummary {
        let mut summary = ConsumeSummary::default();
        info!("Consumer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
                next = self.source.recv() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    summary.received += 1;
                    handle(self.store.as_ref(), delivery, &mut summary).await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to receive message");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                        _ = self.shutdown.wait() => {}
                    }
                }
                None => {
                    info!("Subscription ended");
                    break;
                }
            }
        }

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close subscription");
        }
        self.store.close().await;

        info!(
            received = summary.received,
            inserted = summary.inserted,
            malformed = summary.malformed,
            failed = summary.failed,
            "Consumer stopped"
        );
        summary
    }
}

/// 1件を デコード → 挿入・コミット → ack の順に処理する
async fn handle(store: &dyn EventStore, delivery: Delivery, summary: &mut ConsumeSummary) {
    let result = match protocol::decode(delivery.payload()) {
        Ok(result) => result,
        Err(e) => {
            summary.malformed += 1;
            error!(
                error = %e,
                payload = %preview(delivery.payload()),
                "Discarding malformed event"
            );
            if let Err(e) = delivery.term().await {
                warn!(error = %e, "Failed to terminate malformed message");
            }
            return;
        }
    };

    match store.insert_event(&result).await {
        Ok(stored) => {
            summary.inserted += 1;
            info!(id = stored.id, url = %result.url(), "Event persisted");
            // コミット前にackするとクラッシュ時にイベントが失われる
            if let Err(e) = delivery.ack().await {
                warn!(id = stored.id, error = %e, "Failed to acknowledge persisted event");
            }
        }
        Err(e) => {
            summary.failed += 1;
            error!(url = %result.url(), error = %e, "Failed to persist event, requesting redelivery");
            if let Err(e) = delivery.nak().await {
                warn!(error = %e, "Failed to request redelivery");
            }
        }
    }
}

fn preview(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_PREVIEW_LEN);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
