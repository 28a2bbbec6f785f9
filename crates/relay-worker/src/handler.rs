use async_trait::async_trait;
use relay_core::{InboundEnvelope, LOGIN_RESPONSE_EVENT};
use serde_json::Value;
use tracing::debug;

/// Result type for envelope handlers: the `res` payload or a failure reason
pub type HandlerResult = Result<Value, String>;

/// Domain logic run by a worker for each consumed envelope
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Event type stamped on every response this handler produces
    fn event_type(&self) -> &str;

    async fn handle(&self, envelope: &InboundEnvelope) -> HandlerResult;
}

/// Acknowledges client logins.
///
/// Persisting the user is not done here yet; every login succeeds.
pub struct LoginHandler;

pub const LOGIN_RESULT: &str = "User logged in";

#[async_trait]
impl EnvelopeHandler for LoginHandler {
    fn event_type(&self) -> &str {
        LOGIN_RESPONSE_EVENT
    }

    async fn handle(&self, envelope: &InboundEnvelope) -> HandlerResult {
        debug!(
            connection_id = %envelope.connection_id(),
            name = ?envelope.get("name"),
            "Handling login"
        );
        Ok(Value::String(LOGIN_RESULT.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ConnectionId;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_handler_always_succeeds() {
        let envelope =
            InboundEnvelope::tag(json!({"name": "alice"}), ConnectionId::from("abc")).unwrap();

        let result = LoginHandler.handle(&envelope).await.unwrap();
        assert_eq!(result, json!("User logged in"));
        assert_eq!(LoginHandler.event_type(), "loginResponse");
    }
}
