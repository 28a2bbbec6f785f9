use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metrics for a worker
pub struct WorkerMetrics {
    pub registry: Registry,

    pub envelopes_processed: IntCounter,
    pub responses_published: IntCounter,

    /// Failed deliveries by how they were settled
    pub failures: IntCounterVec,

    pub handler_duration: Histogram,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let envelopes_processed = IntCounter::new(
            "relay_worker_envelopes_processed_total",
            "Inbound envelopes taken off the queue",
        )?;
        registry.register(Box::new(envelopes_processed.clone()))?;

        let responses_published = IntCounter::new(
            "relay_worker_responses_published_total",
            "Outbound envelopes published",
        )?;
        registry.register(Box::new(responses_published.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new("relay_worker_failures_total", "Failed deliveries by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let handler_duration = Histogram::with_opts(HistogramOpts::new(
            "relay_worker_handler_duration_seconds",
            "Time spent in the envelope handler",
        ))?;
        registry.register(Box::new(handler_duration.clone()))?;

        Ok(WorkerMetrics {
            registry,
            envelopes_processed,
            responses_published,
            failures,
            handler_duration,
        })
    }

    pub fn inc_failure(&self, outcome: &str) {
        self.failures.with_label_values(&[outcome]).inc();
    }

    pub fn failure_count(&self, outcome: &str) -> u64 {
        self.failures.with_label_values(&[outcome]).get()
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
