use crate::{
    ensure_ready, parse_broker_url, AckMode, Acknowledger, BrokerChannel, ChannelState, Delivery,
    Subscription,
};
use relay_core::{RelayError, Result};
use relay_protocol::{
    AckRequest, CancelRequest, DeclareQueueRequest, DeliverFrame, ErrorCode, ErrorResponse, Frame, FrameCodec,
    NackRequest, PublishRequest, SubscribeRequest,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct ConsumerEntry {
    sender: mpsc::UnboundedSender<Delivery>,
    ack_mode: AckMode,
}

struct Inner {
    address: String,
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: DashMap<u64, oneshot::Sender<Result<()>>>,
    consumers: DashMap<u64, ConsumerEntry>,
    acker: Arc<dyn Acknowledger>,
    next_request_id: AtomicU64,
    next_consumer_tag: AtomicU64,
    state: watch::Sender<ChannelState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Sends acks and nacks over the channel's connection
struct TcpAcker {
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl Acknowledger for TcpAcker {
    fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.outgoing
            .send(Frame::Ack(AckRequest { delivery_tag }))
            .map_err(|_| RelayError::BrokerUnavailable("connection closed".to_string()))
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.outgoing
            .send(Frame::Nack(NackRequest {
                delivery_tag,
                requeue,
            }))
            .map_err(|_| RelayError::BrokerUnavailable("connection closed".to_string()))
    }
}

/// Broker channel over a single multiplexed TCP connection to the broker
/// daemon.
///
/// Requests are correlated with replies by request id; deliveries are routed
/// to subscriptions by a consumer tag chosen on this side, so a delivery can
/// never race ahead of its subscription being registered.
#[derive(Clone)]
pub struct TcpBrokerChannel {
    inner: Arc<Inner>,
}

impl TcpBrokerChannel {
    /// Open the channel. Fails with `BrokerUnavailable` if the broker cannot
    /// be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let address = parse_broker_url(url)?;
        let (state, _) = watch::channel(ChannelState::Opening);

        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| RelayError::BrokerUnavailable(format!("{address}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let (mut sink, mut frames) = Framed::new(stream, FrameCodec).split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();

        let inner = Arc::new(Inner {
            address: address.clone(),
            outgoing: outgoing.clone(),
            pending: DashMap::new(),
            consumers: DashMap::new(),
            acker: Arc::new(TcpAcker { outgoing }),
            next_request_id: AtomicU64::new(1),
            next_consumer_tag: AtomicU64::new(1),
            state,
            tasks: Mutex::new(Vec::new()),
        });

        let writer_inner = inner.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    error!("Failed to write to broker: {}", e);
                    break;
                }
            }
            writer_inner.shutdown("writer stopped");
        });

        let reader_inner = inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(result) = frames.next().await {
                match result {
                    Ok(frame) => reader_inner.handle_frame(frame),
                    Err(e) => {
                        error!("Protocol error from broker: {}", e);
                        break;
                    }
                }
            }
            reader_inner.shutdown("connection closed by broker");
        });

        inner.tasks.lock().extend([writer, reader]);
        inner.state.send_replace(ChannelState::Ready);
        info!(address = %address, "Connected to broker");

        Ok(TcpBrokerChannel { inner })
    }

    /// Send a request frame and wait for its Ok/Error reply
    async fn request(&self, request_id: u64, frame: Frame) -> Result<()> {
        ensure_ready(self.state())?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request_id, tx);

        // The channel may have closed between the check and the insert.
        if self.state() == ChannelState::Closed || self.inner.outgoing.send(frame).is_err() {
            self.inner.pending.remove(&request_id);
            return Err(RelayError::BrokerUnavailable(
                "channel is closed".to_string(),
            ));
        }

        rx.await.map_err(|_| {
            RelayError::BrokerUnavailable("connection closed before reply".to_string())
        })?
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Inner {
    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Ok(resp) => {
                if let Some((_, tx)) = self.pending.remove(&resp.request_id) {
                    let _ = tx.send(Ok(()));
                }
            }
            Frame::Error(resp) => self.handle_error(resp),
            Frame::Deliver(deliver) => self.handle_deliver(deliver),
            other => {
                warn!("Unexpected frame from broker: {:?}", other.frame_type());
            }
        }
    }

    fn handle_error(&self, resp: ErrorResponse) {
        let error = match resp.code {
            ErrorCode::QueueNotFound => RelayError::QueueNotFound(resp.message),
            ErrorCode::BadRequest => RelayError::Protocol(resp.message),
        };

        match resp.request_id.and_then(|id| self.pending.remove(&id)) {
            Some((_, tx)) => {
                let _ = tx.send(Err(error));
            }
            None => warn!("Broker reported error: {}", error),
        }
    }

    fn handle_deliver(&self, deliver: DeliverFrame) {
        let DeliverFrame {
            consumer_tag,
            delivery_tag,
            queue,
            body,
            attempt,
        } = deliver;

        let Some(entry) = self.consumers.get(&consumer_tag) else {
            // Raced a cancel. Auto-ack tags are unknown to the broker and the
            // nack is rejected there.
            debug!(consumer_tag, delivery_tag, "Delivery for cancelled consumer");
            self.cancel_consumer(consumer_tag);
            let _ = self.acker.nack(delivery_tag, true);
            return;
        };

        let acker = match entry.ack_mode {
            AckMode::Auto => None,
            AckMode::Manual => Some(self.acker.clone()),
        };
        let delivery = Delivery::new(queue, delivery_tag, attempt, body, acker);

        if let Err(mpsc::error::SendError(delivery)) = entry.sender.send(delivery) {
            drop(entry);
            debug!(consumer_tag, "Subscription dropped, discarding consumer");
            self.drop_consumer(consumer_tag);
            // Settles a manual delivery back onto the queue.
            drop(delivery);
        }
    }

    /// Forget a consumer and tell the broker to stop routing to it
    fn drop_consumer(&self, consumer_tag: u64) {
        if self.consumers.remove(&consumer_tag).is_some() {
            self.cancel_consumer(consumer_tag);
        }
    }

    /// Stop the broker from routing more deliveries to `consumer_tag`
    fn cancel_consumer(&self, consumer_tag: u64) {
        let _ = self
            .outgoing
            .send(Frame::Cancel(CancelRequest { consumer_tag }));
    }

    fn shutdown(&self, reason: &str) {
        let previous = self.state.send_replace(ChannelState::Closed);
        if previous == ChannelState::Closed {
            return;
        }

        warn!(address = %self.address, reason, "Broker channel closed");

        // Dropping the senders fails pending requests and ends subscriptions.
        self.pending.clear();
        self.consumers.clear();
    }
}

#[async_trait]
impl BrokerChannel for TcpBrokerChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let request_id = self.next_request_id();
        self.request(
            request_id,
            Frame::DeclareQueue(DeclareQueueRequest {
                request_id,
                queue: queue.to_string(),
            }),
        )
        .await?;

        debug!(queue, "Declared queue");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        ensure_ready(self.state())?;

        self.inner
            .outgoing
            .send(Frame::Publish(PublishRequest {
                queue: queue.to_string(),
                body,
            }))
            .map_err(|_| RelayError::BrokerUnavailable("channel is closed".to_string()))
    }

    async fn subscribe(&self, queue: &str, ack_mode: AckMode) -> Result<Subscription> {
        let consumer_tag = self.inner.next_consumer_tag.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .consumers
            .insert(consumer_tag, ConsumerEntry { sender, ack_mode });

        let request_id = self.next_request_id();
        let result = self
            .request(
                request_id,
                Frame::Subscribe(SubscribeRequest {
                    request_id,
                    queue: queue.to_string(),
                    consumer_tag,
                    ack_mode,
                }),
            )
            .await;

        match result {
            Ok(()) => {
                info!(queue, consumer_tag, ?ack_mode, "Subscribed to queue");
                let inner = Arc::downgrade(&self.inner);
                Ok(
                    Subscription::new(queue, consumer_tag, receiver).on_cancel(move |tag| {
                        if let Some(inner) = inner.upgrade() {
                            inner.drop_consumer(tag);
                        }
                    }),
                )
            }
            Err(e) => {
                self.inner.consumers.remove(&consumer_tag);
                Err(e)
            }
        }
    }

    fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    async fn close(&self) {
        self.inner.shutdown("closed by client");
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
