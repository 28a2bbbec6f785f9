use relay_core::{load_yaml, ConfigError};
use relay_protocol::DEFAULT_BROKER_PORT;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_HTTP_PORT: u16 = 15673;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Port for /health and /metrics
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_BROKER_PORT,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_yaml(path)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.api.http_port)
    }
}
