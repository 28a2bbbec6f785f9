use relay_core::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named event exchanged with a client over the WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        EventFrame {
            event: event.into(),
            data,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Event data as a JSON value. Clients may send the object itself or a
    /// string holding its JSON encoding.
    pub fn payload(self) -> Result<Value> {
        match self.data {
            Value::String(text) => serde_json::from_str(&text)
                .map_err(|e| RelayError::InvalidEnvelope(format!("event data is not JSON: {e}"))),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_payload() {
        let frame = EventFrame::parse(r#"{"event":"message","data":{"name":"alice"}}"#).unwrap();
        assert_eq!(frame.event, "message");
        assert_eq!(frame.payload().unwrap(), json!({"name": "alice"}));
    }

    #[test]
    fn test_stringified_payload() {
        let frame = EventFrame::new("message", json!("{\"name\":\"bob\"}"));
        assert_eq!(frame.payload().unwrap(), json!({"name": "bob"}));
    }

    #[test]
    fn test_bad_string_payload() {
        let frame = EventFrame::new("message", json!("not json"));
        assert!(matches!(frame.payload(), Err(RelayError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_rejects_non_frame() {
        assert!(EventFrame::parse("[1,2,3]").is_err());
        assert!(EventFrame::parse("hello").is_err());
    }

    #[test]
    fn test_server_frame_shape() {
        let text = EventFrame::new("loginResponse", json!("User logged in"))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "loginResponse", "data": "User logged in"}));
    }
}
