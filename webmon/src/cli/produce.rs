//! produce サブコマンド
//!
//! 全ターゲットをチェックしてヘルスイベントを送信する。

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};
use webmon_common::config::MonitorSettings;

use crate::bus::NatsBus;
use crate::config;
use crate::error::StartupError;
use crate::health::HealthChecker;
use crate::publisher::{PublishSummary, Publisher};
use crate::shutdown::ShutdownController;

/// produce サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ProduceArgs {
    /// Repeat the pass every N seconds until terminated (0 = run once)
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

/// produce を実行する
///
/// チェック失敗や1件の送信失敗では `Err` にならない。ブローカーに
/// 接続できない場合はチェックを始める前に `BrokerUnavailable` を返す。
pub async fn execute(
    args: &ProduceArgs,
    settings: &MonitorSettings,
    shutdown: ShutdownController,
) -> Result<PublishSummary, StartupError> {
    settings.validate_for_producer()?;
    let checker = HealthChecker::new(&settings.checker, settings.body_pattern.as_deref())?;
    let bus = NatsBus::connect(&settings.broker, &settings.topic).await?;

    let publisher = Publisher::new(checker, Arc::new(bus.clone()), settings.topic.clone())
        .with_max_concurrency(settings.checker.max_concurrency);

    let interval = args.interval_secs.unwrap_or_else(config::interval_secs);
    let summary = if interval == 0 {
        publisher.run(&settings.targets).await
    } else {
        info!(interval_secs = interval, "Running health checks periodically");
        publisher
            .run_periodic(&settings.targets, Duration::from_secs(interval), &shutdown)
            .await
    };

    if let Err(e) = bus.flush().await {
        warn!(error = %e, "Failed to flush broker connection");
    }
    Ok(summary)
}
