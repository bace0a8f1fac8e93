//! NATS JetStream メッセージバス
//!
//! トピックをJetStreamのsubjectとして扱う。Publisherはブローカーの
//! 受領確認（PubAck）まで待ち、Consumerは永続（durable）プルコンシューマで
//! 明示的ackを行う。

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    stream::{Config as StreamConfig, StorageType},
    AckKind,
};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};
use webmon_common::config::BrokerSettings;

use super::{Acknowledger, Delivery, EventSink, EventSource};
use crate::error::BusError;

/// NATS JetStream メッセージバス
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    stream_name: String,
    redelivery_delay: Duration,
}

impl NatsBus {
    /// ブローカーに接続し、トピックを格納するストリームを用意する
    ///
    /// 接続できない場合は再試行せずに `BusError::Connect` を返す。
    pub async fn connect(settings: &BrokerSettings, topic: &str) -> Result<Self, BusError> {
        let mut options = ConnectOptions::new()
            .name("webmon")
            .connection_timeout(Duration::from_secs(settings.connect_timeout_secs));

        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        if let Some(tls) = &settings.tls {
            options = options
                .require_tls(true)
                .add_root_certificates(tls.ca_file.clone());
            if let (Some(cert), Some(key)) = (&tls.cert_file, &tls.key_file) {
                options = options.add_client_certificate(cert.clone(), key.clone());
            }
        }

        let client = options
            .connect(settings.url.as_str())
            .await
            .map_err(|e| BusError::Connect(format!("{}: {}", settings.url, e)))?;

        let jetstream = jetstream::new(client.clone());
        jetstream
            .get_or_create_stream(StreamConfig {
                name: settings.stream.clone(),
                subjects: vec![topic.to_string()],
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(format!("{}: {}", settings.stream, e)))?;

        info!(
            url = %settings.url,
            stream = %settings.stream,
            topic = %topic,
            "Connected to broker"
        );

        Ok(Self {
            client,
            jetstream,
            stream_name: settings.stream.clone(),
            redelivery_delay: Duration::from_secs(settings.redelivery_delay_secs),
        })
    }

    /// 永続コンシューマとして購読する
    ///
    /// 同じ名前で再接続すると、ackされていないメッセージから再開する。
    pub async fn subscribe(
        &self,
        topic: &str,
        consumer_name: &str,
    ) -> Result<NatsSubscription, BusError> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                consumer_name,
                pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    filter_subject: topic.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        info!(topic = %topic, consumer = %consumer_name, "Subscribed to topic");

        Ok(NatsSubscription {
            client: self.client.clone(),
            messages: Some(messages),
            redelivery_delay: self.redelivery_delay,
        })
    }

    /// 未送信のデータを送り切る
    pub async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }
}

#[async_trait]
impl EventSink for NatsBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let ack = self
            .jetstream
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        let ack = ack.await.map_err(|e| BusError::Publish(e.to_string()))?;
        debug!(stream = %ack.stream, sequence = ack.sequence, "Broker acknowledged publish");
        Ok(())
    }
}

/// JetStream 永続コンシューマの購読
pub struct NatsSubscription {
    client: Client,
    messages: Option<pull::Stream>,
    redelivery_delay: Duration,
}

#[async_trait]
impl EventSource for NatsSubscription {
    async fn recv(&mut self) -> Option<Result<Delivery, BusError>> {
        let messages = self.messages.as_mut()?;
        match messages.next().await? {
            Ok(message) => {
                let payload = message.payload.clone();
                let acker = NatsAcker {
                    message,
                    redelivery_delay: self.redelivery_delay,
                };
                Some(Ok(Delivery::new(payload, Box::new(acker))))
            }
            Err(e) => Some(Err(BusError::Receive(e.to_string()))),
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        // ストリームを破棄するとプル要求が止まる
        self.messages = None;
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

struct NatsAcker {
    message: jetstream::Message,
    redelivery_delay: Duration,
}

/// 再配信を遅らせるnak
///
/// 遅延なしのnakはサーバーが即座に再配信するため、ストア障害中に空回りする。
fn delayed_nak(delay: Duration) -> AckKind {
    AckKind::Nak(Some(delay))
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<(), BusError> {
        self.message
            .ack_with(delayed_nak(self.redelivery_delay))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn term(&self) -> Result<(), BusError> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nak_requests_delayed_redelivery() {
        let delay = Duration::from_secs(BrokerSettings::default().redelivery_delay_secs);
        assert!(!delay.is_zero());
        assert!(matches!(delayed_nak(delay), AckKind::Nak(Some(d)) if d == delay));
    }

    #[tokio::test]
    async fn test_connect_to_missing_broker_fails() {
        // 一度確保して解放したポートにはブローカーがいない
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let settings = BrokerSettings {
            url: format!("nats://127.0.0.1:{}", port),
            connect_timeout_secs: 1,
            ..BrokerSettings::default()
        };

        let result = NatsBus::connect(&settings, "health").await;
        assert!(matches!(result, Err(BusError::Connect(_))));
    }
}
