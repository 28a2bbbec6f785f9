use crate::{ConnectionId, RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire name of the injected connection identity.
pub const CONNECTION_ID_FIELD: &str = "socketId";

/// Client payload tagged with the identity of the connection that sent it.
///
/// Serialized as the client's own object with `socketId` merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(flatten)]
    fields: Map<String, Value>,

    #[serde(rename = "socketId")]
    connection_id: ConnectionId,
}

impl InboundEnvelope {
    /// Merge `payload` with `connection_id`.
    ///
    /// The payload must be a JSON object. A `socketId` already present in the
    /// payload is replaced, so a client cannot address another connection.
    pub fn tag(payload: Value, connection_id: ConnectionId) -> Result<Self> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                return Err(RelayError::InvalidEnvelope(format!(
                    "client payload must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };
        fields.remove(CONNECTION_ID_FIELD);

        Ok(InboundEnvelope {
            fields,
            connection_id,
        })
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Domain fields sent by the client
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Worker response addressed to one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Client-side event to emit
    #[serde(rename = "type")]
    pub event_type: String,

    /// Domain payload handed to the client as event data
    #[serde(rename = "res")]
    pub result: Value,

    /// Copied verbatim from the inbound envelope
    #[serde(rename = "socketId")]
    pub connection_id: ConnectionId,
}

impl OutboundEnvelope {
    /// Build the response to `inbound`, keeping its connection identity.
    pub fn reply(inbound: &InboundEnvelope, event_type: impl Into<String>, result: Value) -> Self {
        OutboundEnvelope {
            event_type: event_type.into(),
            result,
            connection_id: inbound.connection_id.clone(),
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Notice published when a response could not be routed because its
/// connection had already closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientGone {
    /// Event type of the undeliverable response
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(rename = "socketId")]
    pub connection_id: ConnectionId,
}

impl From<&OutboundEnvelope> for ClientGone {
    fn from(envelope: &OutboundEnvelope) -> Self {
        ClientGone {
            event_type: envelope.event_type.clone(),
            connection_id: envelope.connection_id.clone(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
