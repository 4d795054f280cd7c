//! JSON codec for the control-channel envelope.
//!
//! Wire format:
//! ```text
//! {"event": "<kebab-case name>", "payload": { ... }}
//! ```
//! `payload` may be absent or `null` for events that carry nothing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::messages::{EventKind, InboundEvent, OutboundEvent};

/// Errors that can occur while decoding or encoding an envelope.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The text is not a JSON object with an `event` string.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The event name is not one the agent handles.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The payload does not match the event's expected shape.
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: EventKind, reason: String },

    /// Serialization of an outbound event failed.
    #[error("failed to encode {event}: {reason}")]
    Encode { event: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one text frame into a typed inbound event.
///
/// # Errors
///
/// Returns [`ProtocolError`] for non-JSON text, unknown event names, and
/// payloads that do not match the event's shape.
///
/// # Examples
///
/// ```rust
/// use signage_core::protocol::{decode_inbound, InboundEvent};
///
/// let event = decode_inbound(r#"{"event":"playlist-pause"}"#).unwrap();
/// assert_eq!(event, InboundEvent::PlaylistPause);
/// ```
pub fn decode_inbound(text: &str) -> Result<InboundEvent, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
    let kind = EventKind::from_name(&envelope.event)
        .ok_or_else(|| ProtocolError::UnknownEvent(envelope.event.clone()))?;
    let payload = match envelope.payload {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };

    Ok(match kind {
        EventKind::ContentUpdate => InboundEvent::ContentUpdate(payload_as(kind, payload)?),
        EventKind::Navigate => InboundEvent::Navigate(payload_as(kind, payload)?),
        EventKind::ScreenshotRequest => InboundEvent::ScreenshotRequest,
        EventKind::ConfigUpdate => InboundEvent::ConfigUpdate(payload_as(kind, payload)?),
        EventKind::DeviceRestart => InboundEvent::DeviceRestart,
        EventKind::DisplayRefresh => InboundEvent::DisplayRefresh,
        EventKind::RemoteClick => InboundEvent::RemoteClick(payload_as(kind, payload)?),
        EventKind::RemoteType => InboundEvent::RemoteType(payload_as(kind, payload)?),
        EventKind::RemoteKey => InboundEvent::RemoteKey(payload_as(kind, payload)?),
        EventKind::RemoteScroll => InboundEvent::RemoteScroll(payload_as(kind, payload)?),
        EventKind::StreamStart => InboundEvent::StreamStart(payload_as(kind, payload)?),
        EventKind::StreamStop => InboundEvent::StreamStop,
        EventKind::ScreencastStart => InboundEvent::ScreencastStart(payload_as(kind, payload)?),
        EventKind::ScreencastStop => InboundEvent::ScreencastStop,
        EventKind::PlaylistPause => InboundEvent::PlaylistPause,
        EventKind::PlaylistResume => InboundEvent::PlaylistResume,
        EventKind::PlaylistNext => InboundEvent::PlaylistNext(payload_as(kind, payload)?),
        EventKind::PlaylistPrevious => InboundEvent::PlaylistPrevious(payload_as(kind, payload)?),
        EventKind::BroadcastStart => InboundEvent::BroadcastStart(payload_as(kind, payload)?),
        EventKind::BroadcastEnd => InboundEvent::BroadcastEnd,
    })
}

/// Encodes an outbound event into one text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if the payload cannot be serialized.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, ProtocolError> {
    let name = event.event_name();
    let encode_err = |e: serde_json::Error| ProtocolError::Encode {
        event: name,
        reason: e.to_string(),
    };
    let payload = match event {
        OutboundEvent::DeviceRegister(p) => serde_json::to_value(p),
        OutboundEvent::ScreenshotUpload(p) => serde_json::to_value(p),
        OutboundEvent::HealthReport(p) => serde_json::to_value(p),
        OutboundEvent::DeviceStatus(p) => serde_json::to_value(p),
        OutboundEvent::ErrorReport(p) => serde_json::to_value(p),
        OutboundEvent::PlaybackState(p) => serde_json::to_value(p),
        OutboundEvent::ScreencastFrame(p) => serde_json::to_value(p),
    }
    .map_err(encode_err)?;

    serde_json::to_string(&Envelope {
        event: name.to_string(),
        payload,
    })
    .map_err(encode_err)
}

fn payload_as<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::MalformedPayload {
        event: kind,
        reason: e.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
