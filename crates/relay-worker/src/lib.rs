//! Backend worker: consumes inbound envelopes, runs domain logic, and
//! publishes correlated responses.

pub mod config;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::HandlerExecutor;
pub use handler::{EnvelopeHandler, HandlerResult, LoginHandler};
pub use metrics::WorkerMetrics;
pub use worker::Worker;

use relay_core::{ConfigError, RelayError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
