use crate::{config::GatewayConfig, metrics::GatewayMetrics, registry::ConnectionRegistry};
use relay_channel::BrokerChannel;
use std::sync::Arc;

/// Shared gateway runtime state, wrapped in Arc for use across tasks.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub channel: Arc<dyn BrokerChannel>,
    pub registry: ConnectionRegistry,
    pub metrics: GatewayMetrics,
    pub version: String,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        channel: Arc<dyn BrokerChannel>,
        metrics: GatewayMetrics,
    ) -> Arc<Self> {
        Arc::new(GatewayState {
            config,
            channel,
            registry: ConnectionRegistry::new(),
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
