mod config;
mod connection;
mod envelope;
mod error;
mod policy;

pub use config::{load_yaml, ConfigError};
pub use connection::ConnectionId;
pub use envelope::{ClientGone, InboundEnvelope, OutboundEnvelope, CONNECTION_ID_FIELD};
pub use error::{RelayError, Result};
pub use policy::{FailurePolicy, RoutingMissPolicy};

/// Queue the gateway publishes client events to and login workers consume.
pub const INBOUND_QUEUE: &str = "userLogin";

/// Queue workers publish responses to and the gateway consumes.
pub const OUTBOUND_QUEUE: &str = "frontendMessage";

/// Queue receiving `ClientGone` notices when routing misses are reported.
pub const CLIENT_GONE_QUEUE: &str = "clientGone";

/// Client event name the gateway relays to the inbound queue.
pub const CLIENT_EVENT: &str = "message";

/// Event type produced by the login worker.
pub const LOGIN_RESPONSE_EVENT: &str = "loginResponse";

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dead-letter")
}
