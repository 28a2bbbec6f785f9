//! In-tree message broker for the relay.
//!
//! Named non-durable FIFO queues, round-robin delivery, auto or manual
//! acknowledgement. Reachable over TCP through [`Broker`] or in-process
//! through [`EmbeddedBroker`].

pub mod api;
pub mod broker;
pub mod config;
pub mod embedded;
pub mod metrics;
pub mod queue;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use embedded::{EmbeddedBroker, EmbeddedChannel};
pub use metrics::BrokerMetrics;
pub use queue::{Dispatch, PublishOutcome, QueueTable, SessionId};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
