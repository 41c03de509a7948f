//! JSON text codec for signaling envelopes.
//!
//! Two views of the same wire object are provided:
//!
//! - [`decode`]/[`encode`] map to and from the typed [`Envelope`], rejecting
//!   anything outside the closed [`Signal`] union. Clients use this view.
//! - [`decode_frame`] only validates the `type` tag and keeps every other
//!   field as raw JSON. The relay uses this view so it can stamp and forward
//!   messages without interpreting their payloads.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::envelope::{Envelope, Signal, SignalKind};
use crate::identity::{PeerId, RoomName};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value is not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The object has no string `type` field.
    #[error("message has no type")]
    MissingType,
    /// The `type` field names no known message.
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    /// A metadata field has the wrong shape.
    #[error("invalid {field} field: {source}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
    /// The payload does not match the fields required by its type.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The message type whose payload failed to decode.
        kind: SignalKind,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
}

/// A message whose type is known but whose payload is kept as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The validated type tag.
    pub kind: SignalKind,
    /// Every field of the object, including `type`.
    pub fields: Map<String, Value>,
}

impl Frame {
    /// Overwrite the `from` and `room` fields with relay-attested values.
    pub fn stamp(&mut self, from: &PeerId, room: &RoomName) {
        self.fields
            .insert("from".to_string(), Value::String(from.as_str().to_string()));
        self.fields
            .insert("room".to_string(), Value::String(room.as_str().to_string()));
    }

    /// The `room` field, if present and a string.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.fields.get("room").and_then(Value::as_str)
    }

    /// The `ts` field, if present and an unsigned integer.
    #[must_use]
    pub fn ts(&self) -> Option<u64> {
        self.fields.get("ts").and_then(Value::as_u64)
    }

    /// Serialize the frame back to JSON text.
    #[must_use]
    pub fn to_text(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

/// Parse JSON text into a [`Frame`], validating only the `type` tag.
///
/// # Errors
///
/// Returns [`CodecError::Json`], [`CodecError::NotAnObject`],
/// [`CodecError::MissingType`] or [`CodecError::UnknownType`].
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };
    let tag = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?;
    let kind = tag.parse::<SignalKind>().map_err(CodecError::UnknownType)?;
    Ok(Frame { kind, fields })
}

/// Parse JSON text into a typed [`Envelope`].
///
/// # Errors
///
/// Returns any [`CodecError`] if the text is not a well-formed member of the
/// signal union.
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    let Frame { kind, mut fields } = decode_frame(text)?;

    let room = take_meta::<RoomName>(&mut fields, "room")?;
    let sender_id = take_meta::<PeerId>(&mut fields, "senderId")?;
    let from = take_meta::<PeerId>(&mut fields, "from")?;

    let signal = serde_json::from_value::<Signal>(Value::Object(fields))
        .map_err(|source| CodecError::InvalidPayload { kind, source })?;

    Ok(Envelope {
        signal,
        room,
        sender_id,
        from,
    })
}

/// Serialize an [`Envelope`] into a single-line JSON object.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the payload cannot be serialized, or
/// [`CodecError::NotAnObject`] if it does not serialize to an object.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let Value::Object(mut fields) = serde_json::to_value(&envelope.signal)? else {
        return Err(CodecError::NotAnObject);
    };
    if let Some(room) = &envelope.room {
        fields.insert("room".to_string(), Value::String(room.as_str().to_string()));
    }
    if let Some(sender) = &envelope.sender_id {
        fields.insert(
            "senderId".to_string(),
            Value::String(sender.as_str().to_string()),
        );
    }
    if let Some(from) = &envelope.from {
        fields.insert("from".to_string(), Value::String(from.as_str().to_string()));
    }
    Ok(Value::Object(fields).to_string())
}

/// Remove an optional metadata field, treating `null` as absent.
fn take_meta<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<T>, CodecError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| CodecError::InvalidField { field, source }),
    }
}
