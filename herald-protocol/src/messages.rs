//! Wire message and inbound frame shapes

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CodecError;

/// Action names with a reserved meaning
pub mod actions {
    /// Published by the server when a peer connection is accepted. Payload `{"id": n}`.
    pub const CONNECT: &str = "connect";
    /// Published by the server after a peer connection closes. Payload `{"id": n}`.
    pub const DISCONNECT: &str = "disconnect";
    /// Published locally by a client whenever its connection state changes.
    /// Payload `{"state": "<state>"}`.
    pub const CONNECTION_STATE: &str = "connection:state";
}

/// One event on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Semantic type of the event, used for subscription filtering
    pub action: String,
    /// Arbitrary structured payload
    #[serde(default)]
    pub data: Value,
}

impl Message {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Build a message from a decoded JSON value.
    ///
    /// Accepts either the object itself or a JSON string that contains the
    /// encoded object (senders that stringify before emitting). Only one
    /// level of string encoding is unwrapped.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded)? {
                inner @ Value::Object(_) => Ok(serde_json::from_value(inner)?),
                other => Err(CodecError::UnexpectedShape(shape_name(&other))),
            },
            other => Err(CodecError::UnexpectedShape(shape_name(&other))),
        }
    }

    /// Serialize to the JSON body of a frame
    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An inbound frame before it has been parsed into a [`Message`]
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    /// Frame body straight off the socket
    Bytes(Bytes),
    /// Frame body delivered as text
    Text(String),
    /// Frame already decoded into structured form by the transport
    Value(Value),
}

impl RawFrame {
    /// Detect the payload shape and decode it into a [`Message`]
    pub fn decode(self) -> Result<Message, CodecError> {
        let value = match self {
            RawFrame::Bytes(bytes) => serde_json::from_slice::<Value>(&bytes)?,
            RawFrame::Text(text) => serde_json::from_str::<Value>(&text)?,
            RawFrame::Value(value) => value,
        };
        Message::from_value(value)
    }

    /// Size of the frame body in bytes, if it is still unparsed
    pub fn body_len(&self) -> Option<usize> {
        match self {
            RawFrame::Bytes(bytes) => Some(bytes.len()),
            RawFrame::Text(text) => Some(text.len()),
            RawFrame::Value(_) => None,
        }
    }
}

impl From<Message> for RawFrame {
    fn from(message: Message) -> Self {
        let Message { action, data } = message;
        RawFrame::Value(serde_json::json!({ "action": action, "data": data }))
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_structured_value() {
        let raw = RawFrame::Value(json!({ "action": "x", "data": { "v": 1 } }));
        let msg = raw.decode().unwrap();
        assert_eq!(msg, Message::new("x", json!({ "v": 1 })));
    }

    #[test]
    fn test_decode_bytes() {
        let raw = RawFrame::Bytes(Bytes::from_static(br#"{"action":"a","data":[1,2]}"#));
        let msg = raw.decode().unwrap();
        assert_eq!(msg.action, "a");
        assert_eq!(msg.data, json!([1, 2]));
    }

    #[test]
    fn test_decode_string_encoded_object() {
        let encoded = json!({ "action": "y", "data": { "v": 2 } }).to_string();
        let raw = RawFrame::Value(Value::String(encoded.clone()));
        assert_eq!(raw.decode().unwrap(), Message::new("y", json!({ "v": 2 })));

        // Same thing arriving as text on the socket: a JSON string literal
        let doubled = serde_json::to_string(&encoded).unwrap();
        let raw = RawFrame::Text(doubled);
        assert_eq!(raw.decode().unwrap(), Message::new("y", json!({ "v": 2 })));
    }

    #[test]
    fn test_decode_missing_data_defaults_to_null() {
        let raw = RawFrame::Text(r#"{"action":"ping"}"#.into());
        let msg = raw.decode().unwrap();
        assert_eq!(msg.data, Value::Null);
    }

    #[test]
    fn test_decode_rejects_missing_action() {
        let raw = RawFrame::Value(json!({ "data": 1 }));
        assert!(matches!(raw.decode(), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let raw = RawFrame::Value(json!([1, 2, 3]));
        assert!(matches!(
            raw.decode(),
            Err(CodecError::UnexpectedShape("array"))
        ));

        let raw = RawFrame::Value(Value::String("42".into()));
        assert!(matches!(
            raw.decode(),
            Err(CodecError::UnexpectedShape("number"))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let raw = RawFrame::Bytes(Bytes::from_static(b"{not json"));
        assert!(matches!(raw.decode(), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_message_serializes_as_action_and_data() {
        let msg = Message::new("x", json!({ "v": 1 }));
        let body: Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(body, json!({ "action": "x", "data": { "v": 1 } }));
    }

    #[test]
    fn test_raw_frame_from_message() {
        let raw = RawFrame::from(Message::new("z", json!(true)));
        assert_eq!(raw.body_len(), None);
        assert_eq!(raw.decode().unwrap(), Message::new("z", json!(true)));
    }
}
