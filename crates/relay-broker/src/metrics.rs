use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    pub connections: IntGauge,
    pub queues: IntGauge,

    pub messages_published: IntCounterVec,
    pub messages_delivered: IntCounterVec,
    pub messages_unroutable: IntCounter,
    pub messages_requeued: IntCounter,

    pub queue_depth: IntGaugeVec,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections = IntGauge::new(
            "relay_broker_connections",
            "Number of attached broker sessions",
        )?;
        registry.register(Box::new(connections.clone()))?;

        let queues = IntGauge::new("relay_broker_queues", "Number of declared queues")?;
        registry.register(Box::new(queues.clone()))?;

        let messages_published = IntCounterVec::new(
            Opts::new(
                "relay_broker_messages_published_total",
                "Messages accepted onto a queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(messages_published.clone()))?;

        let messages_delivered = IntCounterVec::new(
            Opts::new(
                "relay_broker_messages_delivered_total",
                "Messages handed to consumers",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(messages_delivered.clone()))?;

        let messages_unroutable = IntCounter::new(
            "relay_broker_messages_unroutable_total",
            "Messages published to a queue that does not exist",
        )?;
        registry.register(Box::new(messages_unroutable.clone()))?;

        let messages_requeued = IntCounter::new(
            "relay_broker_messages_requeued_total",
            "Deliveries returned to their queue by nack or session loss",
        )?;
        registry.register(Box::new(messages_requeued.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("relay_broker_queue_depth", "Messages waiting per queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(BrokerMetrics {
            registry,
            connections,
            queues,
            messages_published,
            messages_delivered,
            messages_unroutable,
            messages_requeued,
            queue_depth,
        })
    }

    pub fn inc_published(&self, queue: &str) {
        self.messages_published.with_label_values(&[queue]).inc();
    }

    pub fn inc_delivered(&self, queue: &str) {
        self.messages_delivered.with_label_values(&[queue]).inc();
    }

    pub fn set_queue_depth(&self, queue: &str, depth: i64) {
        self.queue_depth.with_label_values(&[queue]).set(depth);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_queue_labels() {
        let metrics = BrokerMetrics::new().unwrap();
        metrics.inc_published("userLogin");
        metrics.set_queue_depth("userLogin", 3);

        let text = metrics.render().unwrap();
        assert!(text.contains("relay_broker_messages_published_total{queue=\"userLogin\"} 1"));
        assert!(text.contains("relay_broker_queue_depth{queue=\"userLogin\"} 3"));
    }
}
