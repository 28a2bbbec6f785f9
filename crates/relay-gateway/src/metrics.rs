use prometheus::{IntCounter, IntGauge, Registry};

/// Prometheus metrics for the gateway
pub struct GatewayMetrics {
    pub registry: Registry,

    pub active_connections: IntGauge,

    pub client_events: IntCounter,
    pub envelopes_published: IntCounter,
    pub invalid_payloads: IntCounter,

    pub responses_delivered: IntCounter,
    pub routing_misses: IntCounter,
    pub invalid_outbound: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let active_connections = IntGauge::new(
            "relay_gateway_active_connections",
            "Open client WebSocket connections",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let client_events = IntCounter::new(
            "relay_gateway_client_events_total",
            "Client events received on the relayed event name",
        )?;
        registry.register(Box::new(client_events.clone()))?;

        let envelopes_published = IntCounter::new(
            "relay_gateway_envelopes_published_total",
            "Inbound envelopes published to the broker",
        )?;
        registry.register(Box::new(envelopes_published.clone()))?;

        let invalid_payloads = IntCounter::new(
            "relay_gateway_invalid_payloads_total",
            "Client frames rejected before publishing",
        )?;
        registry.register(Box::new(invalid_payloads.clone()))?;

        let responses_delivered = IntCounter::new(
            "relay_gateway_responses_delivered_total",
            "Outbound envelopes handed to their connection",
        )?;
        registry.register(Box::new(responses_delivered.clone()))?;

        let routing_misses = IntCounter::new(
            "relay_gateway_routing_misses_total",
            "Outbound envelopes whose connection was gone",
        )?;
        registry.register(Box::new(routing_misses.clone()))?;

        let invalid_outbound = IntCounter::new(
            "relay_gateway_invalid_outbound_total",
            "Outbound messages that were not valid envelopes",
        )?;
        registry.register(Box::new(invalid_outbound.clone()))?;

        Ok(GatewayMetrics {
            registry,
            active_connections,
            client_events,
            envelopes_published,
            invalid_payloads,
            responses_delivered,
            routing_misses,
            invalid_outbound,
        })
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        prometheus::Encoder::encode(
            &prometheus::TextEncoder::new(),
            &self.registry.gather(),
            &mut buffer,
        )?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
