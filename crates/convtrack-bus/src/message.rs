//! Bus message envelope: `{"type", "data", "context"}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BusError;

/// Context key carrying the request/reply correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: Map::new(),
        }
    }

    /// Message with an empty data object.
    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self::new(msg_type, Map::new())
    }

    /// Build a message from a JSON value. Non-object data becomes empty.
    pub fn from_value(msg_type: impl Into<String>, data: Value) -> Self {
        match data {
            Value::Object(map) => Self::new(msg_type, map),
            _ => Self::empty(msg_type),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Reply to this message on `msg_type`, carrying over its context so the
    /// correlation id travels back to the waiting requester.
    pub fn reply(&self, msg_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: self.context.clone(),
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.context.get(CORRELATION_ID_KEY).and_then(Value::as_str)
    }

    /// Deserialize `data` into a typed payload.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let msg = Message::from_value("converse.skill.activated", json!({"skill_id": "timer"}));
        let wire = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(
            wire,
            json!({
                "type": "converse.skill.activated",
                "data": {"skill_id": "timer"},
                "context": {},
            })
        );
    }

    #[test]
    fn missing_data_and_context_default_to_empty() {
        let msg: Message =
            serde_json::from_value(json!({"type": "mycroft.skill.handler.start"})).expect("parse");
        assert!(msg.data.is_empty());
        assert!(msg.context.is_empty());
    }

    #[test]
    fn non_object_data_is_empty() {
        let msg = Message::from_value("x", json!([1, 2]));
        assert!(msg.data.is_empty());
    }

    #[test]
    fn reply_carries_context() {
        let request = Message::empty("intent.service.skills.get")
            .with_context(CORRELATION_ID_KEY, "req-7")
            .with_context("source", "intent_api");
        let reply = request.reply("intent.service.skills.reply", Map::new());

        assert_eq!(reply.msg_type, "intent.service.skills.reply");
        assert_eq!(reply.correlation_id(), Some("req-7"));
        assert_eq!(reply.context.get("source"), Some(&json!("intent_api")));
    }

    #[test]
    fn parse_data_reports_malformed_payload() {
        #[derive(Debug, Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            skill_id: String,
        }

        let msg = Message::from_value("active_skill_request", json!({"skill_id": 3}));
        assert!(matches!(
            msg.parse_data::<Payload>(),
            Err(BusError::Payload(_))
        ));
    }
}
