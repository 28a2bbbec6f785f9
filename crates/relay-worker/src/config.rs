use relay_core::{dead_letter_queue, load_yaml, ConfigError, FailurePolicy, INBOUND_QUEUE, OUTBOUND_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BROKER_URL: &str = "relay://127.0.0.1:5673";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub inbound_queue: String,
    pub outbound_queue: String,
    pub failure_policy: FailurePolicy,
    /// Deliveries allowed per message under the requeue policy
    pub max_attempts: u32,
    /// Defaults to `<inbound_queue>.dead-letter`
    pub dead_letter_queue: Option<String>,
    pub handler_timeout_secs: u64,
    /// Serve /metrics on this port when set
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            inbound_queue: INBOUND_QUEUE.to_string(),
            outbound_queue: OUTBOUND_QUEUE.to_string(),
            failure_policy: FailurePolicy::Drop,
            max_attempts: 3,
            dead_letter_queue: None,
            handler_timeout_secs: 30,
            metrics_port: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_yaml(path)
    }

    pub fn dead_letter_queue(&self) -> String {
        self.dead_letter_queue
            .clone()
            .unwrap_or_else(|| dead_letter_queue(&self.inbound_queue))
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.handler_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "handler_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.inbound_queue == self.outbound_queue {
            return Err(ConfigError::Invalid(
                "inbound and outbound queues must differ".to_string(),
            ));
        }
        Ok(())
    }
}
