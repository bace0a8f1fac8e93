//! プロセス内メッセージバス
//!
//! Publisher と Consumer を同一プロセスで接続する。トピックごとのキューに
//! 積み、購読者間で分配する（ワークキュー）。受領確認の結果を記録する。
//! nakされたメッセージはキューの先頭に戻り、次の `recv` で再配信される。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use super::{Acknowledger, Delivery, EventSink, EventSource};
use crate::error::BusError;

/// プロセス内メッセージバス
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Bytes>>,
    sealed: bool,
    acked: Vec<Bytes>,
    nacked: Vec<Bytes>,
    terminated: Vec<Bytes>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryBus {
    /// 新しいバスを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 購読を開始
    pub fn subscribe(&self, topic: &str) -> MemorySubscription {
        MemorySubscription {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            closed: false,
        }
    }

    /// 以降の送信がないことを宣言する
    ///
    /// キューが空になった購読は `None` を返して終了する。
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
        self.inner.notify.notify_waiters();
    }

    /// 未配信のメッセージ（送信順）
    pub fn pending(&self, topic: &str) -> Vec<Bytes> {
        self.inner
            .lock()
            .queues
            .get(topic)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// ackされたメッセージ
    pub fn acked(&self) -> Vec<Bytes> {
        self.inner.lock().acked.clone()
    }

    /// nakされたメッセージ
    pub fn nacked(&self) -> Vec<Bytes> {
        self.inner.lock().nacked.clone()
    }

    /// termされたメッセージ
    pub fn terminated(&self) -> Vec<Bytes> {
        self.inner.lock().terminated.clone()
    }

    fn push(&self, topic: &str, payload: Bytes) {
        self.inner
            .lock()
            .queues
            .entry(topic.to_string())
            .or_default()
            .push_back(payload);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl EventSink for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        if self.inner.lock().sealed {
            return Err(BusError::Publish("bus is sealed".to_string()));
        }
        self.push(topic, payload);
        Ok(())
    }
}

/// プロセス内バスの購読
pub struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    closed: bool,
}

#[async_trait]
impl EventSource for MemorySubscription {
    async fn recv(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            // notify_waiters() は作成済みの Notified にも届く
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.lock();
                if self.closed {
                    return None;
                }
                if let Some(payload) = state.queues.get_mut(&self.topic).and_then(|q| q.pop_front())
                {
                    let acker = MemoryAcker {
                        inner: self.inner.clone(),
                        topic: self.topic.clone(),
                        payload: payload.clone(),
                    };
                    return Some(Ok(Delivery::new(payload, Box::new(acker))));
                }
                if state.sealed {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    topic: String,
    payload: Bytes,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.inner.lock().acked.push(self.payload.clone());
        Ok(())
    }

    async fn nak(&self) -> Result<(), BusError> {
        {
            let mut state = self.inner.lock();
            state.nacked.push(self.payload.clone());
            state
                .queues
                .entry(self.topic.clone())
                .or_default()
                .push_front(self.payload.clone());
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self) -> Result<(), BusError> {
        self.inner.lock().terminated.push(self.payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_then_receive_in_order() {
        let bus = MemoryBus::new();
        bus.publish("health", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("health", Bytes::from_static(b"two")).await.unwrap();
        bus.publish("other", Bytes::from_static(b"three")).await.unwrap();
        bus.seal();

        let mut sub = bus.subscribe("health");
        let first = sub.recv().await.unwrap().unwrap();
        assert_eq!(first.payload(), b"one");
        first.ack().await.unwrap();
        let second = sub.recv().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"two");
        second.term().await.unwrap();
        assert!(sub.recv().await.is_none());

        assert_eq!(bus.acked(), vec![Bytes::from_static(b"one")]);
        assert_eq!(bus.terminated(), vec![Bytes::from_static(b"two")]);
        assert_eq!(bus.pending("other").len(), 1);
    }

    #[tokio::test]
    async fn test_nak_redelivers_before_newer_messages() {
        let bus = MemoryBus::new();
        bus.publish("health", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("health", Bytes::from_static(b"two")).await.unwrap();
        bus.seal();

        let mut sub = bus.subscribe("health");
        let first = sub.recv().await.unwrap().unwrap();
        first.nak().await.unwrap();
        assert_eq!(
            bus.pending("health"),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );

        // sealed でも nak されたメッセージは配信される
        let again = sub.recv().await.unwrap().unwrap();
        assert_eq!(again.payload(), b"one");
        again.ack().await.unwrap();
        let second = sub.recv().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"two");
        second.ack().await.unwrap();
        assert!(sub.recv().await.is_none());

        assert_eq!(bus.nacked(), vec![Bytes::from_static(b"one")]);
        assert_eq!(
            bus.acked(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }

    #[tokio::test]
    async fn test_nak_wakes_waiting_subscriber() {
        let bus = MemoryBus::new();
        bus.publish("health", Bytes::from_static(b"retry")).await.unwrap();
        let mut first = bus.subscribe("health");
        let delivery = first.recv().await.unwrap().unwrap();

        let mut second = bus.subscribe("health");
        let waiter = tokio::spawn(async move { second.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        delivery.nak().await.unwrap();

        let redelivered = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("nak should wake a waiting subscriber")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.payload(), b"retry");
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("health");

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("health", Bytes::from_static(b"late"))
                .await
                .unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("recv should wake up on publish")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload(), b"late");
    }

    #[tokio::test]
    async fn test_sealed_bus_rejects_publish() {
        let bus = MemoryBus::new();
        bus.seal();
        assert!(bus.publish("health", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_subscription_ends() {
        let bus = MemoryBus::new();
        bus.publish("health", Bytes::from_static(b"x")).await.unwrap();
        let mut sub = bus.subscribe("health");
        sub.close().await.unwrap();
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.pending("health").len(), 1);
    }
}
