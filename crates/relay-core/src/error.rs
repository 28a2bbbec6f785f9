use crate::ConnectionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The broker connection could not be established or was lost.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A response addressed a connection that is no longer open.
    #[error("No live connection for {0}")]
    RoutingMiss(ConnectionId),

    /// Domain logic failed while processing a consumed message.
    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RelayError {
    /// Whether the owning process should terminate on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::BrokerUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_broker_loss_is_fatal() {
        assert!(RelayError::BrokerUnavailable("closed".into()).is_fatal());
        assert!(!RelayError::RoutingMiss(ConnectionId::from("x")).is_fatal());
        assert!(!RelayError::HandlerFailure("boom".into()).is_fatal());
    }
}
