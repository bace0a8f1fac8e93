//! ヘルスイベントPublisher
//!
//! ターゲットごとに チェック → エンコード → 送信 を行う。送信はブローカーの
//! 受領確認まで待つ。1件の送信失敗はログに残して破棄し、残りのターゲットは続行する。

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{stream, StreamExt};
use tracing::{debug, error, info};
use webmon_common::{protocol, CheckResult, CommonError};

use crate::bus::EventSink;
use crate::health::HealthChecker;
use crate::shutdown::ShutdownController;

/// 1回分（または累計）の送信結果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    /// ブローカーが受領したイベント数
    pub published: usize,
    /// うち到達できなかったターゲットのイベント数
    pub unreachable: usize,
    /// 送信に失敗して破棄したイベント数
    pub dropped: usize,
}

impl PublishSummary {
    fn merge(&mut self, other: PublishSummary) {
        self.published += other.published;
        self.unreachable += other.unreachable;
        self.dropped += other.dropped;
    }
}

enum Outcome {
    Published { reachable: bool },
    Dropped,
}

/// ヘルスイベントPublisher
pub struct Publisher {
    checker: HealthChecker,
    sink: Arc<dyn EventSink>,
    topic: String,
    max_concurrency: usize,
}

impl Publisher {
    /// 新しいPublisherを作成（逐次処理）
    pub fn new(checker: HealthChecker, sink: Arc<dyn EventSink>, topic: impl Into<String>) -> Self {
        Self {
            checker,
            sink,
            topic: topic.into(),
            max_concurrency: 1,
        }
    }

    /// 同時にチェックするターゲット数を設定
    ///
    /// 結果は常にターゲットの順序で送信される。
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// 全ターゲットを1回ずつ処理する
    pub async fn run(&self, targets: &[String]) -> PublishSummary {
        info!(
            targets = targets.len(),
            topic = %self.topic,
            pattern = self.checker.has_pattern(),
            "Starting health check pass"
        );

        // チェックだけを並行させ、送信はターゲット順に1件ずつ行う
        let outcomes: Vec<Outcome> = stream::iter(targets)
            .map(|url| async move { (url, self.checker.check(url).await) })
            .buffered(self.max_concurrency)
            .then(|(url, checked)| self.publish(url, checked))
            .collect()
            .await;

        let mut summary = PublishSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Published { reachable } => {
                    summary.published += 1;
                    if !reachable {
                        summary.unreachable += 1;
                    }
                }
                Outcome::Dropped => summary.dropped += 1,
            }
        }

        info!(
            published = summary.published,
            unreachable = summary.unreachable,
            dropped = summary.dropped,
            "Health check pass completed"
        );
        summary
    }

    /// シャットダウンが要求されるまで一定間隔で繰り返す
    ///
    /// 実行中のパスは最後まで完了させる。戻り値は全パスの累計。
    pub async fn run_periodic(
        &self,
        targets: &[String],
        interval: Duration,
        shutdown: &ShutdownController,
    ) -> PublishSummary {
        let mut total = PublishSummary::default();
        loop {
            total.merge(self.run(targets).await);
            if shutdown.is_shutdown_requested() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => break,
            }
        }
        info!(published = total.published, dropped = total.dropped, "Publisher stopped");
        total
    }

    async fn publish(
        &self,
        url: &str,
        checked: Result<CheckResult, CommonError>,
    ) -> Outcome {
        let result = match checked {
            Ok(result) => result,
            Err(e) => {
                error!(url = %url, error = %e, "Skipping invalid target");
                return Outcome::Dropped;
            }
        };

        let payload = Bytes::from(protocol::encode(&result));
        match self.sink.publish(&self.topic, payload).await {
            Ok(()) => {
                debug!(url = %url, topic = %self.topic, "Health event published");
                Outcome::Published {
                    reachable: result.is_reachable(),
                }
            }
            Err(e) => {
                error!(url = %url, topic = %self.topic, error = %e, "Dropping health event");
                Outcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::error::BusError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use webmon_common::config::CheckerSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker() -> HealthChecker {
        HealthChecker::new(
            &CheckerSettings {
                timeout_secs: 2,
                ..CheckerSettings::default()
            },
            None,
        )
        .unwrap()
    }

    fn unreachable_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}/", listener.local_addr().unwrap())
    }

    /// 指定した回目の送信だけ失敗するSink
    struct FlakySink {
        fail_on: usize,
        calls: Mutex<usize>,
        delivered: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn publish(&self, _topic: &str, payload: Bytes) -> Result<(), BusError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == self.fail_on {
                return Err(BusError::Publish("broker rejected message".to_string()));
            }
            self.delivered.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_publishes_one_event_per_target_in_order() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock)
            .await;

        let targets = vec![format!("{}/up", mock.uri()), unreachable_url()];
        let bus = MemoryBus::new();
        let publisher = Publisher::new(checker(), Arc::new(bus.clone()), "health");

        let summary = publisher.run(&targets).await;

        assert_eq!(
            summary,
            PublishSummary {
                published: 2,
                unreachable: 1,
                dropped: 0
            }
        );
        let messages = bus.pending("health");
        assert_eq!(messages.len(), 2);
        let first = protocol::decode(&messages[0]).unwrap();
        let second = protocol::decode(&messages[1]).unwrap();
        assert_eq!(first.url(), targets[0]);
        assert_eq!(first.status_code(), Some(200));
        // 到達できなくてもイベントは送信される
        assert_eq!(second.url(), targets[1]);
        assert!(!second.is_reachable());
    }

    #[tokio::test]
    async fn test_send_failure_drops_only_that_event() {
        let targets = vec![unreachable_url(), unreachable_url(), unreachable_url()];
        let sink = Arc::new(FlakySink {
            fail_on: 2,
            calls: Mutex::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let publisher = Publisher::new(checker(), sink.clone(), "health");

        let summary = publisher.run(&targets).await;

        assert_eq!(summary.published, 2);
        assert_eq!(summary.dropped, 1);
        let delivered = sink.delivered.lock().unwrap();
        let urls: Vec<String> = delivered
            .iter()
            .map(|p| protocol::decode(p).unwrap().url().to_string())
            .collect();
        assert_eq!(urls, vec![targets[0].clone(), targets[2].clone()]);
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_target_order() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let targets = vec![format!("{}/slow", mock.uri()), format!("{}/fast", mock.uri())];
        let bus = MemoryBus::new();
        let publisher =
            Publisher::new(checker(), Arc::new(bus.clone()), "health").with_max_concurrency(4);

        publisher.run(&targets).await;

        let statuses: Vec<Option<u16>> = bus
            .pending("health")
            .iter()
            .map(|p| protocol::decode(p).unwrap().status_code())
            .collect();
        assert_eq!(statuses, vec![Some(200), Some(204)]);
    }

    /// 同時に実行中の送信数の最大値を記録するSink
    #[derive(Default)]
    struct OverlapSink {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delivered: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl EventSink for OverlapSink {
        async fn publish(&self, _topic: &str, payload: Bytes) -> Result<(), BusError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.delivered.lock().unwrap().push(payload);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_checks_publish_one_at_a_time() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let targets = vec![
            format!("{}/slow", mock.uri()),
            format!("{}/fast", mock.uri()),
            format!("{}/fast", mock.uri()),
        ];
        let sink = Arc::new(OverlapSink::default());
        let publisher = Publisher::new(checker(), sink.clone(), "health").with_max_concurrency(3);

        let summary = publisher.run(&targets).await;

        assert_eq!(summary.published, 3);
        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
        let statuses: Vec<Option<u16>> = sink
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|p| protocol::decode(p).unwrap().status_code())
            .collect();
        assert_eq!(statuses, vec![Some(200), Some(204), Some(204)]);
    }

    #[tokio::test]
    async fn test_run_periodic_stops_on_shutdown() {
        let targets = vec![unreachable_url()];
        let bus = MemoryBus::new();
        let publisher = Publisher::new(checker(), Arc::new(bus.clone()), "health");
        let shutdown = ShutdownController::default();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.request_shutdown();
        });

        let total = tokio::time::timeout(
            Duration::from_secs(5),
            publisher.run_periodic(&targets, Duration::from_secs(60), &shutdown),
        )
        .await
        .expect("periodic run should stop on shutdown");

        assert_eq!(total.published, 1);
        assert_eq!(bus.pending("health").len(), 1);
    }
}
