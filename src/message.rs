//! Message envelopes exchanged through a provider.
//!
//! [`JmsMessage`] is the payload carried by transfers. It is encoded with
//! bincode's standard configuration through the [`Message`] helper trait,
//! which any `Encode + Decode` type picks up via a blanket implementation.

use std::collections::BTreeMap;

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

use crate::{
    engine::DeliveryId,
    id::{ConsumerId, ProducerId},
    meta::Destination,
};

/// Bincode helpers for wire payloads.
pub trait Message: Encode + Decode<()> {
    /// Serialize the message into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Deserialize a message from a byte slice, returning the message and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        decode_from_slice(bytes, config::standard())
    }
}

impl<T> Message for T where T: Encode + Decode<()> {}

/// Typed application property value.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub enum PropertyValue {
    /// Boolean property.
    Bool(bool),
    /// 8-bit signed integer.
    Byte(i8),
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
}

/// A JMS-style message: headers, properties and an opaque body.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct JmsMessage {
    /// Message id assigned by the sender.
    pub message_id: Option<String>,
    /// Correlation id.
    pub correlation_id: Option<String>,
    /// Destination the message was sent to.
    pub destination: Option<Destination>,
    /// Reply destination.
    pub reply_to: Option<Destination>,
    /// Priority 0-9.
    pub priority: u8,
    /// Whether the broker must store the message durably.
    pub persistent: bool,
    /// Absolute expiry in epoch milliseconds, zero for none.
    pub expiration: u64,
    /// Send time in epoch milliseconds.
    pub timestamp: u64,
    /// Application supplied type tag.
    pub message_type: Option<String>,
    /// Message group id.
    pub group_id: Option<String>,
    /// Position within the message group.
    pub group_sequence: u32,
    /// Number of earlier delivery attempts.
    pub redelivery_count: u32,
    /// Application properties.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Body bytes. The provider does not interpret them.
    pub body: Vec<u8>,
}

impl Default for JmsMessage {
    fn default() -> Self {
        Self {
            message_id: None,
            correlation_id: None,
            destination: None,
            reply_to: None,
            priority: 4,
            persistent: true,
            expiration: 0,
            timestamp: 0,
            message_type: None,
            group_id: None,
            group_sequence: 0,
            redelivery_count: 0,
            properties: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl JmsMessage {
    /// Message with the given body and default headers.
    #[must_use]
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Set an application property, returning `self` for chaining.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A message submitted to [`crate::provider::Provider::send`].
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    /// Producer the message is sent through.
    pub producer: ProducerId,
    /// Destination for anonymous producers; ignored otherwise.
    pub destination: Option<Destination>,
    /// The message itself.
    pub message: JmsMessage,
}

impl OutboundMessage {
    /// Envelope for a producer with a fixed destination.
    #[must_use]
    pub fn new(producer: ProducerId, message: JmsMessage) -> Self {
        Self {
            producer,
            destination: None,
            message,
        }
    }

    /// Envelope for an anonymous producer.
    #[must_use]
    pub fn to(producer: ProducerId, destination: Destination, message: JmsMessage) -> Self {
        Self {
            producer,
            destination: Some(destination),
            message,
        }
    }
}

/// A message delivered to a consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundDelivery {
    /// Receiving consumer.
    pub consumer: ConsumerId,
    /// Delivery id to pass back to `acknowledge`.
    pub delivery: DeliveryId,
    /// Whether the peer already settled the delivery.
    pub settled: bool,
    /// Decoded message.
    pub message: JmsMessage,
}

/// How an inbound delivery is settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckType {
    /// Consumed successfully.
    Accepted,
    /// Return to the broker for redelivery elsewhere.
    Released,
    /// Poison message; do not redeliver.
    Rejected,
    /// Redeliver with an incremented delivery count.
    Modified {
        /// Count the attempt as failed.
        delivery_failed: bool,
        /// Do not redeliver to this consumer.
        undeliverable_here: bool,
    },
}
