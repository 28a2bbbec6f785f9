use crate::handler::EnvelopeHandler;
use relay_core::{InboundEnvelope, RelayError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Runs an [`EnvelopeHandler`] with a timeout and panic isolation
pub struct HandlerExecutor {
    handler: Arc<dyn EnvelopeHandler>,
    timeout: Duration,
}

impl HandlerExecutor {
    pub fn new(handler: Arc<dyn EnvelopeHandler>, timeout: Duration) -> Self {
        HandlerExecutor { handler, timeout }
    }

    pub fn event_type(&self) -> &str {
        self.handler.event_type()
    }

    /// Execute the handler. Errors, timeouts and panics all come back as
    /// `HandlerFailure`.
    pub async fn execute(&self, envelope: InboundEnvelope) -> Result<Value, RelayError> {
        let handler = self.handler.clone();
        let limit = self.timeout;
        let connection_id = envelope.connection_id().clone();

        let task = tokio::spawn(async move {
            timeout(limit, handler.handle(&envelope)).await
        });

        match task.await {
            Ok(Ok(Ok(result))) => {
                debug!(%connection_id, "Handler completed");
                Ok(result)
            }
            Ok(Ok(Err(e))) => {
                error!(%connection_id, "Handler failed: {}", e);
                Err(RelayError::HandlerFailure(e))
            }
            Ok(Err(_)) => {
                error!(%connection_id, "Handler timed out after {:?}", limit);
                Err(RelayError::HandlerFailure(format!(
                    "handler timed out after {:?}",
                    limit
                )))
            }
            Err(e) if e.is_panic() => {
                error!(%connection_id, "Handler panicked");
                Err(RelayError::HandlerFailure("handler panicked".to_string()))
            }
            Err(_) => Err(RelayError::HandlerFailure(
                "handler was cancelled".to_string(),
            )),
        }
    }
}
