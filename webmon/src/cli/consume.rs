//! consume サブコマンド
//!
//! ストアとテーブルを用意し、購読したヘルスイベントを永続化し続ける。

use clap::Args;
use tracing::info;
use webmon_common::config::MonitorSettings;

use crate::bus::nats::{NatsBus, NatsSubscription};
use crate::consumer::{ConsumeSummary, EventConsumer};
use crate::db::connect_store;
use crate::error::StartupError;
use crate::shutdown::ShutdownController;

/// consume サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    /// Durable consumer name (overrides broker.consumer)
    #[arg(long)]
    pub consumer: Option<String>,
}

/// consume を実行する
///
/// 起動順: ストア接続 → テーブル作成 → ブローカー接続 → 購読。
/// いずれかに失敗したら、確保済みのストア接続を閉じて `Err` を返す。
pub async fn execute(
    args: &ConsumeArgs,
    settings: &MonitorSettings,
    shutdown: ShutdownController,
) -> Result<ConsumeSummary, StartupError> {
    let mut settings = settings.clone();
    if let Some(consumer) = &args.consumer {
        settings.broker.consumer = consumer.clone();
    }
    settings.validate_for_consumer()?;

    let store = connect_store(&settings.store).await?;
    if let Err(e) = store.ensure_schema().await {
        store.close().await;
        return Err(e.into());
    }

    let subscription = match connect_and_subscribe(&settings).await {
        Ok(subscription) => subscription,
        Err(e) => {
            store.close().await;
            return Err(e);
        }
    };

    info!(topic = %settings.topic, consumer = %settings.broker.consumer, "Persisting health events");
    let consumer = EventConsumer::new(store, Box::new(subscription), shutdown);
    Ok(consumer.run().await)
}

async fn connect_and_subscribe(
    settings: &MonitorSettings,
) -> Result<NatsSubscription, StartupError> {
    let bus = NatsBus::connect(&settings.broker, &settings.topic).await?;
    let subscription = bus
        .subscribe(&settings.topic, &settings.broker.consumer)
        .await?;
    Ok(subscription)
}
