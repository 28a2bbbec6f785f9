use crate::{metrics::BrokerMetrics, BrokerError};
use bytes::Bytes;
use parking_lot::Mutex;
use relay_protocol::{AckMode, DeliverFrame};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one attached client (a TCP connection or an embedded channel)
pub type SessionId = u64;

/// A message handed to a session for one of its consumers
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub consumer_tag: u64,
    pub delivery_tag: u64,
    pub queue: String,
    pub body: Bytes,
    pub attempt: u32,
}

impl From<Dispatch> for DeliverFrame {
    fn from(dispatch: Dispatch) -> Self {
        DeliverFrame {
            consumer_tag: dispatch.consumer_tag,
            delivery_tag: dispatch.delivery_tag,
            queue: dispatch.queue,
            body: dispatch.body.to_vec(),
            attempt: dispatch.attempt,
        }
    }
}

/// Result of publishing to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// No queue with that name exists; the message was discarded
    Unroutable,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    body: Bytes,
    /// Deliveries so far
    deliveries: u32,
}

#[derive(Debug, Clone, Copy)]
struct Consumer {
    session: SessionId,
    consumer_tag: u64,
    ack_mode: AckMode,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<QueuedMessage>,
    consumers: Vec<Consumer>,
    /// Round-robin position among consumers
    cursor: usize,
}

struct Unacked {
    queue: String,
    message: QueuedMessage,
}

struct Session {
    outbox: mpsc::UnboundedSender<Dispatch>,
    next_delivery_tag: u64,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Default)]
struct TableInner {
    queues: HashMap<String, QueueState>,
    sessions: HashMap<SessionId, Session>,
    next_session: SessionId,
}

/// Named, non-durable FIFO queues with their consumers.
///
/// Messages on a queue go to its consumers in round-robin order. Auto-ack
/// deliveries are forgotten once handed out; manual-ack deliveries are held
/// until acked, nacked, or their session closes (which requeues them).
pub struct QueueTable {
    inner: Mutex<TableInner>,
    metrics: Arc<BrokerMetrics>,
}

impl QueueTable {
    pub fn new(metrics: Arc<BrokerMetrics>) -> Self {
        QueueTable {
            inner: Mutex::new(TableInner::default()),
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Attach a session whose deliveries are sent to `outbox`
    pub fn open_session(&self, outbox: mpsc::UnboundedSender<Dispatch>) -> SessionId {
        let mut inner = self.inner.lock();
        inner.next_session += 1;
        let id = inner.next_session;
        inner.sessions.insert(
            id,
            Session {
                outbox,
                next_delivery_tag: 1,
                unacked: HashMap::new(),
            },
        );
        id
    }

    /// Detach a session: drop its consumers and requeue whatever it had not
    /// acknowledged. Returns the number of requeued messages.
    pub fn close_session(&self, session: SessionId) -> usize {
        let mut inner = self.inner.lock();
        let Some(state) = inner.sessions.remove(&session) else {
            return 0;
        };

        let mut touched = Vec::new();
        for (name, queue) in inner.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.session != session);
            if queue.consumers.len() != before {
                touched.push(name.clone());
            }
        }

        // Oldest delivery goes back to the head of its queue last, so it ends
        // up first.
        let mut unacked: Vec<(u64, Unacked)> = state.unacked.into_iter().collect();
        unacked.sort_by(|a, b| b.0.cmp(&a.0));
        let requeued = unacked.len();

        for (_, entry) in unacked {
            if let Some(queue) = inner.queues.get_mut(&entry.queue) {
                queue.messages.push_front(entry.message);
                touched.push(entry.queue);
            }
        }

        if requeued > 0 {
            debug!(session, requeued, "Requeued unacknowledged messages");
            self.metrics.messages_requeued.inc_by(requeued as u64);
        }

        touched.sort();
        touched.dedup();
        for queue in touched {
            self.dispatch(&mut inner, &queue);
        }

        requeued
    }

    /// Create the queue if it does not exist. Returns true if it was created.
    pub fn declare(&self, queue: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.queues.contains_key(queue) {
            return false;
        }

        inner.queues.insert(queue.to_string(), QueueState::default());
        self.metrics.queues.set(inner.queues.len() as i64);
        self.metrics.set_queue_depth(queue, 0);
        true
    }

    pub fn publish(&self, queue: &str, body: Bytes) -> PublishOutcome {
        let mut inner = self.inner.lock();
        let Some(state) = inner.queues.get_mut(queue) else {
            warn!(queue, "Publish to undeclared queue, dropping message");
            self.metrics.messages_unroutable.inc();
            return PublishOutcome::Unroutable;
        };

        state.messages.push_back(QueuedMessage {
            body,
            deliveries: 0,
        });
        self.metrics.inc_published(queue);
        self.dispatch(&mut inner, queue);
        PublishOutcome::Queued
    }

    pub fn subscribe(
        &self,
        session: SessionId,
        queue: &str,
        consumer_tag: u64,
        ack_mode: AckMode,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if !inner.sessions.contains_key(&session) {
            return Err(BrokerError::UnknownSession(session));
        }

        let state = inner
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        state.consumers.push(Consumer {
            session,
            consumer_tag,
            ack_mode,
        });

        self.dispatch(&mut inner, queue);
        Ok(())
    }

    /// Remove a consumer. Messages already handed to it stay with its session.
    pub fn cancel(&self, session: SessionId, consumer_tag: u64) -> bool {
        let mut inner = self.inner.lock();
        let mut removed = false;
        for queue in inner.queues.values_mut() {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.session == session && c.consumer_tag == consumer_tag));
            removed |= queue.consumers.len() != before;
        }
        removed
    }

    /// Settle a manual-ack delivery. Returns false for an unknown tag.
    pub fn ack(&self, session: SessionId, delivery_tag: u64) -> bool {
        let mut inner = self.inner.lock();
        inner
            .sessions
            .get_mut(&session)
            .and_then(|s| s.unacked.remove(&delivery_tag))
            .is_some()
    }

    /// Reject a manual-ack delivery, optionally putting it back at the head
    /// of its queue. Returns false for an unknown tag.
    pub fn nack(&self, session: SessionId, delivery_tag: u64, requeue: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner
            .sessions
            .get_mut(&session)
            .and_then(|s| s.unacked.remove(&delivery_tag))
        else {
            return false;
        };

        if requeue {
            if let Some(queue) = inner.queues.get_mut(&entry.queue) {
                queue.messages.push_front(entry.message);
                self.metrics.messages_requeued.inc();
                self.dispatch(&mut inner, &entry.queue);
            }
        }
        true
    }

    /// Messages waiting in `queue`, or None if it does not exist
    pub fn depth(&self, queue: &str) -> Option<usize> {
        self.inner.lock().queues.get(queue).map(|q| q.messages.len())
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.inner.lock().queues.get(queue).map(|q| q.consumers.len())
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Hand out queued messages while the queue has both messages and
    /// consumers.
    fn dispatch(&self, inner: &mut TableInner, queue_name: &str) {
        let TableInner {
            queues, sessions, ..
        } = inner;

        let Some(queue) = queues.get_mut(queue_name) else {
            return;
        };

        while !queue.messages.is_empty() && !queue.consumers.is_empty() {
            let index = queue.cursor % queue.consumers.len();
            let consumer = queue.consumers[index];

            let Some(session) = sessions.get_mut(&consumer.session) else {
                queue.consumers.remove(index);
                continue;
            };

            let Some(mut message) = queue.messages.pop_front() else {
                break;
            };
            message.deliveries += 1;

            let delivery_tag = session.next_delivery_tag;
            session.next_delivery_tag += 1;

            let dispatch = Dispatch {
                consumer_tag: consumer.consumer_tag,
                delivery_tag,
                queue: queue_name.to_string(),
                body: message.body.clone(),
                attempt: message.deliveries,
            };

            if consumer.ack_mode == AckMode::Manual {
                session.unacked.insert(
                    delivery_tag,
                    Unacked {
                        queue: queue_name.to_string(),
                        message: message.clone(),
                    },
                );
            }

            if session.outbox.send(dispatch).is_err() {
                // Session is going away; keep the message for someone else.
                session.unacked.remove(&delivery_tag);
                message.deliveries -= 1;
                queue.messages.push_front(message);
                queue.consumers.remove(index);
                continue;
            }

            queue.cursor = index + 1;
            self.metrics.inc_delivered(queue_name);
        }

        self.metrics
            .set_queue_depth(queue_name, queue.messages.len() as i64);
    }
}
