use crate::{
    config::WorkerConfig,
    executor::HandlerExecutor,
    handler::EnvelopeHandler,
    metrics::WorkerMetrics,
    WorkerError,
};
use async_trait::async_trait;
use relay_channel::{AckMode, BrokerChannel, BrokerChannelExt, Delivery, DeliveryHandler};
use relay_core::{FailurePolicy, InboundEnvelope, OutboundEnvelope, RelayError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consumes inbound envelopes, runs the handler and publishes one response
/// per success.
///
/// Deliveries are consumed with manual acknowledgement and processed one at
/// a time in arrival order.
pub struct Worker {
    config: WorkerConfig,
    channel: Arc<dyn BrokerChannel>,
    executor: HandlerExecutor,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        channel: Arc<dyn BrokerChannel>,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> std::result::Result<Self, WorkerError> {
        config.validate()?;
        let metrics = Arc::new(WorkerMetrics::new()?);
        let executor = HandlerExecutor::new(handler, config.handler_timeout());

        Ok(Worker {
            config,
            channel,
            executor,
            metrics,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Declare the queues this worker touches, subscribe, and process until
    /// the subscription ends. Always returns an error: losing the broker is
    /// fatal.
    pub async fn run(&self) -> Result<()> {
        self.declare_queues().await?;

        let subscription = self
            .channel
            .subscribe(&self.config.inbound_queue, AckMode::Manual)
            .await?;

        info!(
            inbound = %self.config.inbound_queue,
            outbound = %self.config.outbound_queue,
            failure_policy = %self.config.failure_policy,
            "Worker consuming"
        );

        subscription.dispatch(self).await
    }

    async fn declare_queues(&self) -> Result<()> {
        self.channel.declare_queue(&self.config.inbound_queue).await?;
        self.channel.declare_queue(&self.config.outbound_queue).await?;

        if self.config.failure_policy == FailurePolicy::DeadLetter {
            self.channel
                .declare_queue(&self.config.dead_letter_queue())
                .await?;
        }
        Ok(())
    }

    async fn process(&self, delivery: Delivery) {
        self.metrics.envelopes_processed.inc();

        let envelope = match InboundEnvelope::from_slice(delivery.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    queue = delivery.queue(),
                    delivery_tag = delivery.delivery_tag(),
                    "Discarding malformed envelope: {}",
                    e
                );
                self.discard_malformed(delivery).await;
                return;
            }
        };

        debug!(
            connection_id = %envelope.connection_id(),
            delivery_tag = delivery.delivery_tag(),
            attempt = delivery.attempt(),
            "Processing envelope"
        );

        let timer = self.metrics.handler_duration.start_timer();
        let outcome = self.executor.execute(envelope.clone()).await;
        timer.observe_duration();

        match outcome {
            Ok(result) => self.respond(delivery, &envelope, result).await,
            Err(e) => self.apply_failure_policy(delivery, &envelope, e).await,
        }
    }

    async fn respond(&self, delivery: Delivery, envelope: &InboundEnvelope, result: Value) {
        let response = OutboundEnvelope::reply(envelope, self.executor.event_type(), result);

        match self
            .channel
            .publish_json(&self.config.outbound_queue, &response)
            .await
        {
            Ok(()) => {
                self.metrics.responses_published.inc();
                debug!(
                    connection_id = %response.connection_id,
                    event_type = %response.event_type,
                    "Published response"
                );
                settle(delivery.ack());
            }
            Err(e) => {
                // Left unacked; the broker requeues it when the channel goes.
                error!(connection_id = %response.connection_id, "Failed to publish response: {}", e);
            }
        }
    }

    async fn apply_failure_policy(
        &self,
        delivery: Delivery,
        envelope: &InboundEnvelope,
        failure: RelayError,
    ) {
        let connection_id = envelope.connection_id();

        match self.config.failure_policy {
            FailurePolicy::Drop => {
                warn!(%connection_id, "Dropping envelope after failure: {}", failure);
                self.metrics.inc_failure("dropped");
                settle(delivery.ack());
            }
            FailurePolicy::Requeue => {
                if delivery.attempt() < self.config.max_attempts {
                    warn!(
                        %connection_id,
                        attempt = delivery.attempt(),
                        "Requeueing envelope after failure: {}",
                        failure
                    );
                    self.metrics.inc_failure("requeued");
                    settle(delivery.nack(true));
                } else {
                    error!(
                        %connection_id,
                        attempts = delivery.attempt(),
                        "Giving up on envelope: {}",
                        failure
                    );
                    self.metrics.inc_failure("exhausted");
                    settle(delivery.ack());
                }
            }
            FailurePolicy::DeadLetter => {
                warn!(%connection_id, "Dead-lettering envelope after failure: {}", failure);
                self.dead_letter(delivery, "dead-lettered").await;
            }
        }
    }

    /// Malformed envelopes can never succeed, so they are never requeued
    async fn discard_malformed(&self, delivery: Delivery) {
        if self.config.failure_policy == FailurePolicy::DeadLetter {
            self.dead_letter(delivery, "malformed").await;
        } else {
            self.metrics.inc_failure("malformed");
            settle(delivery.ack());
        }
    }

    async fn dead_letter(&self, delivery: Delivery, outcome: &str) {
        let queue = self.config.dead_letter_queue();

        match self.channel.publish(&queue, delivery.body().to_vec()).await {
            Ok(()) => {
                self.metrics.inc_failure(outcome);
                settle(delivery.ack());
            }
            Err(e) => {
                error!(queue = %queue, "Failed to dead-letter envelope: {}", e);
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for Worker {
    async fn handle(&self, delivery: Delivery) {
        self.process(delivery).await;
    }
}

fn settle(result: Result<()>) {
    if let Err(e) = result {
        warn!("Failed to settle delivery: {}", e);
    }
}
