//! WebSocket gateway bridging clients to the broker.
//!
//! Each client event is tagged with the connection's identity and published
//! to the inbound queue; each response on the outbound queue is handed to
//! exactly the connection it names.

pub mod config;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
pub mod ws;

pub use config::GatewayConfig;
pub use events::EventFrame;
pub use metrics::GatewayMetrics;
pub use registry::ConnectionRegistry;
pub use server::{build_gateway_app, Gateway, GatewayHandle};
pub use state::GatewayState;

use relay_core::{ConfigError, RelayError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
