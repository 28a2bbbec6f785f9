use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{RelayError, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Settles manual-ack deliveries with the broker that issued them.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, delivery_tag: u64) -> Result<()>;

    fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// One message handed to a consumer.
///
/// Auto-ack deliveries are already consumed; `ack` and `nack` are no-ops for
/// them. Manual-ack deliveries stay owned by the broker until settled, and
/// one dropped unsettled goes back to its queue.
pub struct Delivery {
    queue: String,
    delivery_tag: u64,
    attempt: u32,
    body: Bytes,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        delivery_tag: u64,
        attempt: u32,
        body: impl Into<Bytes>,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Self {
        Delivery {
            queue: queue.into(),
            delivery_tag,
            attempt,
            body: body.into(),
            acker,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// 1 on first delivery, incremented each time the message is requeued
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    pub fn ack(mut self) -> Result<()> {
        match self.acker.take() {
            Some(acker) => acker.ack(self.delivery_tag),
            None => Ok(()),
        }
    }

    pub fn nack(mut self, requeue: bool) -> Result<()> {
        match self.acker.take() {
            Some(acker) => acker.nack(self.delivery_tag, requeue),
            None => Ok(()),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            if let Err(e) = acker.nack(self.delivery_tag, true) {
                debug!(
                    queue = %self.queue,
                    delivery_tag = self.delivery_tag,
                    "Could not return unsettled delivery: {}", e
                );
            }
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("delivery_tag", &self.delivery_tag)
            .field("attempt", &self.attempt)
            .field("body_len", &self.body.len())
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// Typed handler registered against a subscription.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery);
}

type CancelHook = Box<dyn FnOnce(u64) + Send>;

/// Stream of deliveries for one consumer.
///
/// Ends when the channel closes or the broker connection is lost. Dropping
/// it cancels the consumer, then returns buffered manual-ack deliveries to
/// the queue.
pub struct Subscription {
    queue: String,
    consumer_tag: u64,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    on_cancel: Option<CancelHook>,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        consumer_tag: u64,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Subscription {
            queue: queue.into(),
            consumer_tag,
            receiver,
            on_cancel: None,
        }
    }

    /// Run `hook` with the consumer tag when the subscription is dropped
    pub fn on_cancel(mut self, hook: impl FnOnce(u64) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> u64 {
        self.consumer_tag
    }

    /// Wait for the next delivery
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Feed deliveries to `handler` one at a time, in arrival order.
    ///
    /// Only returns once the subscription has ended, which always means the
    /// broker is gone.
    pub async fn dispatch<H>(mut self, handler: &H) -> Result<()>
    where
        H: DeliveryHandler + ?Sized,
    {
        while let Some(delivery) = self.next().await {
            handler.handle(delivery).await;
        }

        Err(RelayError::BrokerUnavailable(format!(
            "subscription to {} ended",
            self.queue
        )))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Cancel first so the broker does not hand requeued messages back here.
        if let Some(cancel) = self.on_cancel.take() {
            cancel(self.consumer_tag);
        }

        self.receiver.close();
        while let Ok(delivery) = self.receiver.try_recv() {
            drop(delivery);
        }
    }
}
