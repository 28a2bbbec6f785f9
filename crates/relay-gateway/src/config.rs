use relay_core::{
    load_yaml, ConfigError, RoutingMissPolicy, CLIENT_EVENT, CLIENT_GONE_QUEUE, INBOUND_QUEUE,
    OUTBOUND_QUEUE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BROKER_URL: &str = "relay://127.0.0.1:5673";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub broker_url: String,
    pub inbound_queue: String,
    pub outbound_queue: String,
    /// Client event relayed to the inbound queue
    pub client_event: String,
    pub routing_miss_policy: RoutingMissPolicy,
    /// Receives `ClientGone` notices under the notify policy
    pub client_gone_queue: String,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            broker_url: DEFAULT_BROKER_URL.to_string(),
            inbound_queue: INBOUND_QUEUE.to_string(),
            outbound_queue: OUTBOUND_QUEUE.to_string(),
            client_event: CLIENT_EVENT.to_string(),
            routing_miss_policy: RoutingMissPolicy::Drop,
            client_gone_queue: CLIENT_GONE_QUEUE.to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_yaml(path)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_queue == self.outbound_queue {
            return Err(ConfigError::Invalid(
                "inbound and outbound queues must differ".to_string(),
            ));
        }
        if self.client_event.is_empty() {
            return Err(ConfigError::Invalid("client_event must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.broker_url, "relay://127.0.0.1:5673");
        assert_eq!(config.client_event, "message");
        assert_eq!(config.routing_miss_policy, RoutingMissPolicy::Drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 8081\nrouting_miss_policy: notify").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.routing_miss_policy, RoutingMissPolicy::Notify);
        assert_eq!(config.inbound_queue, "userLogin");
    }

    #[test]
    fn test_validate_rejects_same_queue() {
        let config = GatewayConfig {
            outbound_queue: "userLogin".to_string(),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
