//! Broker channel abstraction shared by the gateway and the workers.
//!
//! A [`BrokerChannel`] is one logical connection to the broker, opened once at
//! process start and passed explicitly to the services that need it. It moves
//! through [`ChannelState::Opening`], [`ChannelState::Ready`] and finally
//! [`ChannelState::Closed`]; there is no reconnect.

mod delivery;
mod tcp;

pub use delivery::{Acknowledger, Delivery, DeliveryHandler, Subscription};
pub use relay_protocol::AckMode;
pub use tcp::TcpBrokerChannel;

use async_trait::async_trait;
use relay_core::{RelayError, Result};
use relay_protocol::DEFAULT_BROKER_PORT;
use serde::Serialize;

/// Lifecycle of a broker channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Ready,
    Closed,
}

/// One logical connection to the message broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Ensure a non-durable queue named `queue` exists. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Enqueue `body` on `queue` without waiting for the broker.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Register a consumer on `queue`.
    async fn subscribe(&self, queue: &str, ack_mode: AckMode) -> Result<Subscription>;

    fn state(&self) -> ChannelState;

    /// Close the channel. Subscriptions end and later calls fail.
    async fn close(&self);
}

/// Structured publishing on top of [`BrokerChannel::publish`].
#[async_trait]
pub trait BrokerChannelExt: BrokerChannel {
    /// Serialize `message` to JSON and publish it on `queue`.
    async fn publish_json<T>(&self, queue: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let body = serde_json::to_vec(message)?;
        self.publish(queue, body).await
    }
}

impl<C: BrokerChannel + ?Sized> BrokerChannelExt for C {}

/// Resolve a broker URL (`relay://host:port` or `host:port`) to a socket
/// address string. The port defaults to the broker's standard port.
pub fn parse_broker_url(url: &str) -> Result<String> {
    let address = url.trim().strip_prefix("relay://").unwrap_or(url.trim());
    let address = address.trim_end_matches('/');

    if address.is_empty() {
        return Err(RelayError::Protocol("empty broker url".to_string()));
    }
    if address.contains("://") {
        return Err(RelayError::Protocol(format!(
            "unsupported broker url scheme: {url}"
        )));
    }

    if address.contains(':') {
        Ok(address.to_string())
    } else {
        Ok(format!("{address}:{DEFAULT_BROKER_PORT}"))
    }
}

pub(crate) fn ensure_ready(state: ChannelState) -> Result<()> {
    match state {
        ChannelState::Ready => Ok(()),
        ChannelState::Opening => Err(RelayError::BrokerUnavailable(
            "channel is not open yet".to_string(),
        )),
        ChannelState::Closed => Err(RelayError::BrokerUnavailable(
            "channel is closed".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("relay://10.0.0.5:6000").unwrap(),
            "10.0.0.5:6000"
        );
        assert_eq!(parse_broker_url("localhost:7000").unwrap(), "localhost:7000");
        assert_eq!(
            parse_broker_url("relay://broker/").unwrap(),
            format!("broker:{DEFAULT_BROKER_PORT}")
        );
    }

    #[test]
    fn test_parse_broker_url_rejects_other_schemes() {
        assert!(parse_broker_url("amqp://127.0.0.1").is_err());
        assert!(parse_broker_url("relay://").is_err());
    }

    #[test]
    fn test_ensure_ready() {
        assert!(ensure_ready(ChannelState::Ready).is_ok());
        assert!(matches!(
            ensure_ready(ChannelState::Closed),
            Err(RelayError::BrokerUnavailable(_))
        ));
    }
}
