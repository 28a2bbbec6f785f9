use crate::{
    metrics::BrokerMetrics,
    queue::{Dispatch, QueueTable, SessionId},
    BrokerError, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use relay_channel::{AckMode, Acknowledger, BrokerChannel, ChannelState, Delivery, Subscription};
use relay_core::RelayError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// A broker living inside the current process.
///
/// Every [`EmbeddedChannel`] opened from it is a separate session, so a
/// gateway and a worker sharing one embedded broker behave as if they were
/// separate processes connected over TCP.
#[derive(Clone)]
pub struct EmbeddedBroker {
    table: Arc<QueueTable>,
}

impl EmbeddedBroker {
    pub fn new() -> Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new()?);
        Ok(EmbeddedBroker {
            table: Arc::new(QueueTable::new(metrics)),
        })
    }

    pub fn table(&self) -> Arc<QueueTable> {
        self.table.clone()
    }

    pub fn channel(&self) -> EmbeddedChannel {
        EmbeddedChannel::open(self.table.clone())
    }
}

struct EmbeddedAcker {
    table: Arc<QueueTable>,
    session: SessionId,
}

impl Acknowledger for EmbeddedAcker {
    fn ack(&self, delivery_tag: u64) -> relay_core::Result<()> {
        if self.table.ack(self.session, delivery_tag) {
            Ok(())
        } else {
            Err(unknown_delivery(delivery_tag))
        }
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> relay_core::Result<()> {
        if self.table.nack(self.session, delivery_tag, requeue) {
            Ok(())
        } else {
            Err(unknown_delivery(delivery_tag))
        }
    }
}

fn unknown_delivery(delivery_tag: u64) -> RelayError {
    RelayError::Protocol(format!("unknown delivery tag {delivery_tag}"))
}

struct ConsumerEntry {
    sender: mpsc::UnboundedSender<Delivery>,
    ack_mode: AckMode,
}

/// In-process [`BrokerChannel`] backed by a [`QueueTable`] session.
pub struct EmbeddedChannel {
    table: Arc<QueueTable>,
    session: SessionId,
    consumers: Arc<DashMap<u64, ConsumerEntry>>,
    next_consumer_tag: AtomicU64,
    state: watch::Sender<ChannelState>,
    router: JoinHandle<()>,
}

impl EmbeddedChannel {
    pub fn open(table: Arc<QueueTable>) -> Self {
        let (outbox, mut dispatches) = mpsc::unbounded_channel::<Dispatch>();
        let session = table.open_session(outbox);
        table.metrics().connections.inc();

        let consumers: Arc<DashMap<u64, ConsumerEntry>> = Arc::new(DashMap::new());
        let acker = Arc::new(EmbeddedAcker {
            table: table.clone(),
            session,
        });

        let router = {
            let consumers = consumers.clone();
            tokio::spawn(async move {
                while let Some(dispatch) = dispatches.recv().await {
                    route(&consumers, &acker, dispatch);
                }
            })
        };

        let (state, _) = watch::channel(ChannelState::Ready);

        EmbeddedChannel {
            table,
            session,
            consumers,
            next_consumer_tag: AtomicU64::new(1),
            state,
            router,
        }
    }

    fn shutdown(&self) {
        if *self.state.borrow() == ChannelState::Closed {
            return;
        }

        self.state.send_replace(ChannelState::Closed);
        self.consumers.clear();
        let requeued = self.table.close_session(self.session);
        self.table.metrics().connections.dec();
        self.router.abort();
        debug!(session = self.session, requeued, "Embedded channel closed");
    }

    fn ensure_open(&self) -> relay_core::Result<()> {
        if *self.state.borrow() == ChannelState::Closed {
            return Err(RelayError::BrokerUnavailable(
                "channel is closed".to_string(),
            ));
        }
        Ok(())
    }
}

fn route(consumers: &DashMap<u64, ConsumerEntry>, acker: &Arc<EmbeddedAcker>, dispatch: Dispatch) {
    let Some(entry) = consumers.get(&dispatch.consumer_tag) else {
        acker.table.cancel(acker.session, dispatch.consumer_tag);
        let _ = acker.nack(dispatch.delivery_tag, true);
        return;
    };

    let manual = entry.ack_mode == AckMode::Manual;
    let delivery = Delivery::new(
        dispatch.queue,
        dispatch.delivery_tag,
        dispatch.attempt,
        dispatch.body,
        manual.then(|| acker.clone() as Arc<dyn Acknowledger>),
    );

    if let Err(mpsc::error::SendError(delivery)) = entry.sender.send(delivery) {
        drop(entry);
        drop_consumer(consumers, &acker.table, acker.session, dispatch.consumer_tag);
        drop(delivery);
    }
}

fn drop_consumer(
    consumers: &DashMap<u64, ConsumerEntry>,
    table: &QueueTable,
    session: SessionId,
    consumer_tag: u64,
) {
    consumers.remove(&consumer_tag);
    table.cancel(session, consumer_tag);
}

#[async_trait]
impl BrokerChannel for EmbeddedChannel {
    async fn declare_queue(&self, queue: &str) -> relay_core::Result<()> {
        self.ensure_open()?;
        self.table.declare(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> relay_core::Result<()> {
        self.ensure_open()?;
        self.table.publish(queue, Bytes::from(body));
        Ok(())
    }

    async fn subscribe(&self, queue: &str, ack_mode: AckMode) -> relay_core::Result<Subscription> {
        self.ensure_open()?;

        let consumer_tag = self.next_consumer_tag.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.consumers
            .insert(consumer_tag, ConsumerEntry { sender, ack_mode });

        if let Err(e) = self
            .table
            .subscribe(self.session, queue, consumer_tag, ack_mode)
        {
            self.consumers.remove(&consumer_tag);
            return Err(match e {
                BrokerError::QueueNotFound(queue) => RelayError::QueueNotFound(queue),
                other => RelayError::BrokerUnavailable(other.to_string()),
            });
        }

        let consumers = Arc::downgrade(&self.consumers);
        let table = self.table.clone();
        let session = self.session;
        Ok(
            Subscription::new(queue, consumer_tag, receiver).on_cancel(move |tag| {
                if let Some(consumers) = consumers.upgrade() {
                    drop_consumer(&consumers, &table, session, tag);
                }
            }),
        )
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    async fn close(&self) {
        self.shutdown();
    }
}

impl Drop for EmbeddedChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_channel::BrokerChannelExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(subscription: &mut Subscription) -> Delivery {
        timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("timed out waiting for delivery")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn test_publish_and_consume_json() {
        let broker = EmbeddedBroker::new().unwrap();
        let producer = broker.channel();
        let consumer = broker.channel();

        producer.declare_queue("userLogin").await.unwrap();
        let mut subscription = consumer.subscribe("userLogin", AckMode::Auto).await.unwrap();

        producer
            .publish_json("userLogin", &json!({"name": "alice"}))
            .await
            .unwrap();

        let delivery = next(&mut subscription).await;
        assert!(!delivery.requires_ack());
        assert_eq!(delivery.json::<Value>().unwrap(), json!({"name": "alice"}));
    }

    #[tokio::test]
    async fn test_subscribe_missing_queue() {
        let broker = EmbeddedBroker::new().unwrap();
        let channel = broker.channel();

        let result = channel.subscribe("missing", AckMode::Auto).await;
        assert!(matches!(result, Err(RelayError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_nack_requeues() {
        let broker = EmbeddedBroker::new().unwrap();
        let channel = broker.channel();
        channel.declare_queue("q").await.unwrap();
        let mut subscription = channel.subscribe("q", AckMode::Manual).await.unwrap();

        channel.publish("q", b"job".to_vec()).await.unwrap();

        let first = next(&mut subscription).await;
        assert_eq!(first.attempt(), 1);
        first.nack(true).unwrap();

        let second = next(&mut subscription).await;
        assert_eq!(second.attempt(), 2);
        second.ack().unwrap();

        assert_eq!(broker.table().depth("q"), Some(0));
    }

    #[tokio::test]
    async fn test_closing_channel_requeues_unacked_and_ends_subscription() {
        let broker = EmbeddedBroker::new().unwrap();
        let first = broker.channel();
        first.declare_queue("q").await.unwrap();
        let mut subscription = first.subscribe("q", AckMode::Manual).await.unwrap();

        first.publish("q", b"job".to_vec()).await.unwrap();
        let delivery = next(&mut subscription).await;

        first.close().await;
        assert_eq!(first.state(), ChannelState::Closed);
        assert!(subscription.next().await.is_none());
        assert!(delivery.ack().is_err());
        assert!(matches!(
            first.publish("q", Vec::new()).await,
            Err(RelayError::BrokerUnavailable(_))
        ));

        let second = broker.channel();
        let mut redelivery = second.subscribe("q", AckMode::Auto).await.unwrap();
        let delivery = next(&mut redelivery).await;
        assert_eq!(delivery.body(), b"job");
        assert_eq!(delivery.attempt(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscription_returns_manual_delivery() {
        let broker = EmbeddedBroker::new().unwrap();
        let channel = broker.channel();
        channel.declare_queue("q").await.unwrap();

        let subscription = channel.subscribe("q", AckMode::Manual).await.unwrap();
        drop(subscription);
        channel.publish("q", b"job".to_vec()).await.unwrap();

        let mut replacement = channel.subscribe("q", AckMode::Auto).await.unwrap();
        let delivery = next(&mut replacement).await;
        assert_eq!(delivery.body(), b"job");
    }

    #[tokio::test]
    async fn test_dropped_subscription_returns_buffered_manual_deliveries() {
        let broker = EmbeddedBroker::new().unwrap();
        let channel = broker.channel();
        channel.declare_queue("q").await.unwrap();

        let subscription = channel.subscribe("q", AckMode::Manual).await.unwrap();
        channel.publish("q", b"a".to_vec()).await.unwrap();
        channel.publish("q", b"b".to_vec()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.table().depth("q"), Some(0));

        drop(subscription);
        assert_eq!(broker.table().consumer_count("q"), Some(0));
        assert_eq!(broker.table().depth("q"), Some(2));

        let mut replacement = channel.subscribe("q", AckMode::Auto).await.unwrap();
        let mut bodies = vec![
            next(&mut replacement).await.body().to_vec(),
            next(&mut replacement).await.body().to_vec(),
        ];
        bodies.sort();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
