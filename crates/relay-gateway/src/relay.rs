use crate::{events::EventFrame, state::GatewayState};
use async_trait::async_trait;
use relay_channel::{BrokerChannelExt, Delivery, DeliveryHandler};
use relay_core::{ClientGone, OutboundEnvelope, RoutingMissPolicy};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Routes worker responses from the outbound queue to their connection
pub struct OutboundRelay {
    state: Arc<GatewayState>,
}

impl OutboundRelay {
    pub fn new(state: Arc<GatewayState>) -> Self {
        OutboundRelay { state }
    }

    async fn route(&self, envelope: OutboundEnvelope) {
        let state = &self.state;

        let frame = match EventFrame::new(envelope.event_type.clone(), envelope.result.clone()).to_text() {
            Ok(frame) => frame,
            Err(e) => {
                state.metrics.invalid_outbound.inc();
                warn!("Failed to encode response frame: {}", e);
                return;
            }
        };

        match state.registry.deliver(&envelope.connection_id, frame) {
            Ok(()) => {
                state.metrics.responses_delivered.inc();
                debug!(
                    connection_id = %envelope.connection_id,
                    event_type = %envelope.event_type,
                    "Delivered response"
                );
            }
            Err(e) => {
                state.metrics.routing_misses.inc();
                debug!(event_type = %envelope.event_type, "{}", e);
                self.on_routing_miss(&envelope).await;
            }
        }
    }

    async fn on_routing_miss(&self, envelope: &OutboundEnvelope) {
        let state = &self.state;
        if state.config.routing_miss_policy != RoutingMissPolicy::Notify {
            return;
        }

        let notice = ClientGone::from(envelope);
        if let Err(e) = state
            .channel
            .publish_json(&state.config.client_gone_queue, &notice)
            .await
        {
            error!(connection_id = %notice.connection_id, "Failed to publish client-gone notice: {}", e);
        }
    }
}

#[async_trait]
impl DeliveryHandler for OutboundRelay {
    async fn handle(&self, delivery: Delivery) {
        match OutboundEnvelope::from_slice(delivery.body()) {
            Ok(envelope) => self.route(envelope).await,
            Err(e) => {
                self.state.metrics.invalid_outbound.inc();
                warn!(delivery_tag = delivery.delivery_tag(), "Invalid outbound envelope: {}", e);
            }
        }
    }
}
