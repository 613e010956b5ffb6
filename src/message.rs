//! Wire formats carried over the broker

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A GraphQL operation relayed to the upstream service
///
/// Only `query` is required on decode. Producers that omit `id` or
/// `timestamp` get a fresh id and the time of decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Opaque random message id
    #[serde(default = "fresh_id")]
    pub id: String,
    /// Operation body (query or mutation document)
    pub query: String,
    /// Operation variables
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OutboundMessage {
    /// Create a message with a fresh random id
    pub fn new(query: impl Into<String>, variables: Map<String, JsonValue>) -> Self {
        Self {
            id: fresh_id(),
            query: query.into(),
            variables,
            timestamp: Utc::now(),
        }
    }

    /// Serialize for publishing
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a consumed message body
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}

/// Body of a correlated reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    /// The upstream `data` field
    Data(JsonValue),
    /// The worker gave up on the operation
    Error(String),
}

impl Reply {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// Turn the reply into the caller's result
    pub fn into_result(self) -> Result<JsonValue> {
        match self {
            Reply::Data(data) => Ok(data),
            Reply::Error(message) => Err(Error::Upstream(message)),
        }
    }
}

/// A failed message archived in the error queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    #[serde(flatten)]
    pub message: OutboundMessage,
    /// Last error seen by the worker
    pub error: String,
    /// Physical name of the lane the message came from
    pub original_queue: String,
}

impl DeadLetter {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_message_shape() {
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!("42"));
        let message = OutboundMessage::new("query { holaMundo }", variables);

        let value: JsonValue = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(value["query"], "query { holaMundo }");
        assert_eq!(value["variables"]["id"], "42");
        assert!(value["id"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = OutboundMessage::new("{ a }", Map::new());
        let b = OutboundMessage::new("{ a }", Map::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_missing_variables_default_to_empty() {
        let body = br#"{"id":"1","query":"{ a }","timestamp":"2024-05-01T10:00:00Z"}"#;
        let message = OutboundMessage::from_bytes(body).unwrap();
        assert!(message.variables.is_empty());
    }

    #[test]
    fn test_minimal_body_gets_id_and_timestamp() {
        let before = Utc::now();
        let message =
            OutboundMessage::from_bytes(br#"{"query":"{ a }","variables":{"x":1}}"#).unwrap();
        assert_eq!(message.query, "{ a }");
        assert_eq!(message.variables.get("x"), Some(&json!(1)));
        assert!(uuid::Uuid::parse_str(&message.id).is_ok());
        assert!(message.timestamp >= before);

        let message = OutboundMessage::from_bytes(br#"{"id":"m-1","query":"{ a }"}"#).unwrap();
        assert_eq!(message.id, "m-1");
    }

    #[test]
    fn test_malformed_body() {
        let err = OutboundMessage::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn test_reply_encoding() {
        let reply = Reply::Data(json!({"holaMundo": "hola"}));
        let value: JsonValue = serde_json::from_slice(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(value, json!({"data": {"holaMundo": "hola"}}));

        let reply = Reply::Error("GraphQL Error: boom".to_string());
        let value: JsonValue = serde_json::from_slice(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(value, json!({"error": "GraphQL Error: boom"}));
    }

    #[test]
    fn test_error_reply_into_result() {
        let err = Reply::Error("boom".to_string()).into_result().unwrap_err();
        assert!(matches!(err, Error::Upstream(msg) if msg == "boom"));
    }

    #[test]
    fn test_dead_letter_is_flat() {
        let message = OutboundMessage::new("mutation { crearProfesor }", Map::new());
        let dead = DeadLetter {
            message: message.clone(),
            error: "GraphQL Error: []".to_string(),
            original_queue: "proasig_normal_priority".to_string(),
        };

        let value: JsonValue = serde_json::from_slice(&dead.to_bytes().unwrap()).unwrap();
        assert_eq!(value["id"], message.id.as_str());
        assert_eq!(value["query"], "mutation { crearProfesor }");
        assert_eq!(value["originalQueue"], "proasig_normal_priority");
        assert_eq!(value["error"], "GraphQL Error: []");
    }
}
