//! Named messages delivered to actor mailboxes.
//!
//! A [`Message`] pairs an event name with an opaque structured payload. The
//! runtime routes on the name only; the payload belongs to whoever sent it
//! and is never inspected by the scheduler.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::id::ActorId;

/// Structured value carried by a message.
pub type Payload = serde_json::Value;

/// A named unit of delivery.
///
/// Messages are cheap to clone: the name and the payload are shared, so a
/// repeating timer can hand the same message to its target on every tick.
#[derive(Clone, Debug)]
pub struct Message {
    name: Arc<str>,
    payload: Arc<Payload>,
    original_recipient: Option<ActorId>,
}

impl Message {
    /// Delivered once to every actor right after it is registered.
    pub const INIT: &'static str = "colony.init";
    /// Delivered to an actor to end its lifecycle.
    pub const FINALIZE: &'static str = "colony.finalize";

    /// Create a message with an empty object payload.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_payload(name, Payload::Object(serde_json::Map::new()))
    }

    pub fn with_payload(name: impl Into<Arc<str>>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload: Arc::new(payload),
            original_recipient: None,
        }
    }

    /// Build a message from the JSON text of its payload.
    pub fn from_json(name: impl Into<Arc<str>>, json: &str) -> Result<Self, serde_json::Error> {
        let payload = serde_json::from_str(json)?;
        Ok(Self::with_payload(name, payload))
    }

    /// Build a message whose payload is the serialized form of `data`.
    pub fn from_data<T>(name: impl Into<Arc<str>>, data: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(data)?;
        Ok(Self::with_payload(name, payload))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        <T as serde::Deserialize>::deserialize(self.payload.as_ref())
    }

    /// The actor this message was addressed to before any routing applied.
    ///
    /// `None` until the message has been sent.
    pub fn original_recipient(&self) -> Option<ActorId> {
        self.original_recipient
    }

    /// Whether the name is one the runtime issues itself.
    pub fn is_reserved(&self) -> bool {
        matches!(self.name(), Self::INIT | Self::FINALIZE)
    }

    pub(crate) fn init() -> Self {
        Self::new(Self::INIT)
    }

    pub(crate) fn finalize() -> Self {
        Self::new(Self::FINALIZE)
    }

    pub(crate) fn addressed_to(mut self, recipient: ActorId) -> Self {
        self.original_recipient = Some(recipient);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WheelSpeeds {
        left: f64,
        right: f64,
    }

    #[test]
    fn test_new_message_has_empty_object_payload() {
        let message = Message::new("Ping");
        assert_eq!(message.name(), "Ping");
        assert_eq!(message.payload(), &serde_json::json!({}));
        assert_eq!(message.original_recipient(), None);
        assert!(!message.is_reserved());
    }

    #[test]
    fn test_typed_payload() {
        let speeds = WheelSpeeds {
            left: 0.5,
            right: -0.25,
        };
        let message = Message::from_data("SetSpeeds", &speeds).unwrap();
        assert_eq!(message.decode::<WheelSpeeds>().unwrap(), speeds);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(Message::from_json("Ping", "{\"n\": 1}").is_ok());
        assert!(Message::from_json("Ping", "{n: 1").is_err());
    }

    #[test]
    fn test_addressing_keeps_payload_shared() {
        let message = Message::with_payload("Ping", serde_json::json!({"n": 1}));
        let addressed = message.clone().addressed_to(ActorId::new(7));
        assert_eq!(addressed.original_recipient(), Some(ActorId::new(7)));
        assert!(Arc::ptr_eq(&message.payload, &addressed.payload));
    }

    #[test]
    fn test_reserved_names() {
        assert!(Message::init().is_reserved());
        assert!(Message::finalize().is_reserved());
    }
}
