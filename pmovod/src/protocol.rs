//! Duplex channel protocol.
//!
//! Control messages travel as JSON text frames shaped as
//! `{"event": <name>, "data": <payload>}`. Media chunks travel as binary
//! frames: an 8-byte big-endian sequence number followed by the payload.
//!
//! ```text
//! C→S  start {file, offset, speed} | ack <seq> | pause | continue
//! S→C  data <binary> | mediainfo {format: {duration}, thumbnailurl} | eos | error | verbose
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VodError};
use crate::queue::Segment;

const SEQ_HEADER_LEN: usize = 8;

/// Payload of the `start` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Path of the resource on the server
    pub file: String,
    /// Absolute position (seconds) delivery starts from
    pub offset: f64,
    /// Playback rate, already encoded according to the configured `SpeedEncoding`
    pub speed: f64,
}

/// Messages sent by the controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    Start(StartRequest),
    Ack(u64),
    Pause,
    Continue,
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Start(_) => "start",
            ClientMessage::Ack(_) => "ack",
            ClientMessage::Pause => "pause",
            ClientMessage::Continue => "continue",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a client frame, used by servers and test peers.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.event.as_str() {
            "start" => Ok(ClientMessage::Start(serde_json::from_value(envelope.data)?)),
            "ack" => Ok(ClientMessage::Ack(serde_json::from_value(envelope.data)?)),
            "pause" => Ok(ClientMessage::Pause),
            "continue" => Ok(ClientMessage::Continue),
            other => Err(VodError::protocol(format!("unknown client event '{}'", other))),
        }
    }
}

/// Asset metadata announced once, early in the session.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    /// Whole seconds
    pub duration: f64,
    /// Prefix a timestamp is appended to in order to build a thumbnail URL
    pub thumbnail_template: Option<String>,
}

/// Messages received by the controller.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    Data(Segment),
    MediaInfo(MediaInfo),
    Eos,
    Error(Option<String>),
    Verbose(String),
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawMediaInfo {
    format: RawFormat,
    #[serde(default)]
    thumbnailurl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    duration: RawDuration,
}

// ffprobe reports the duration as a decimal string, some servers send a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Number(f64),
    Text(String),
}

impl RawDuration {
    fn whole_seconds(&self) -> Result<f64> {
        let value = match self {
            RawDuration::Number(n) => *n,
            RawDuration::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| VodError::protocol(format!("invalid duration '{}'", s)))?,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(VodError::protocol(format!("invalid duration {}", value)));
        }
        Ok(value.trunc())
    }
}

impl ServerMessage {
    /// Decodes a JSON text frame. Unknown events yield `Ok(None)`.
    pub fn decode_text(text: &str) -> Result<Option<Self>> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let message = match envelope.event.as_str() {
            "mediainfo" => {
                let raw: RawMediaInfo = serde_json::from_value(envelope.data)?;
                ServerMessage::MediaInfo(MediaInfo {
                    duration: raw.format.duration.whole_seconds()?,
                    thumbnail_template: raw.thumbnailurl.filter(|t| !t.is_empty()),
                })
            }
            "eos" => ServerMessage::Eos,
            "error" => ServerMessage::Error(match envelope.data {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }),
            "verbose" => ServerMessage::Verbose(match envelope.data {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Decodes a binary `data` frame.
    pub fn decode_binary(frame: &[u8]) -> Result<Self> {
        if frame.len() < SEQ_HEADER_LEN {
            return Err(VodError::protocol(format!(
                "data frame too short: {} bytes",
                frame.len()
            )));
        }
        let mut header = [0u8; SEQ_HEADER_LEN];
        header.copy_from_slice(&frame[..SEQ_HEADER_LEN]);
        let seq = u64::from_be_bytes(header);
        Ok(ServerMessage::Data(Segment::new(
            seq,
            Bytes::copy_from_slice(&frame[SEQ_HEADER_LEN..]),
        )))
    }

    /// Encodes a message as a wire frame, used by servers and test peers.
    pub fn encode(&self) -> Result<WireFrame> {
        let (event, data) = match self {
            ServerMessage::Data(segment) => {
                let mut frame = Vec::with_capacity(SEQ_HEADER_LEN + segment.payload.len());
                frame.extend_from_slice(&segment.seq.to_be_bytes());
                frame.extend_from_slice(&segment.payload);
                return Ok(WireFrame::Binary(frame));
            }
            ServerMessage::MediaInfo(info) => (
                "mediainfo",
                serde_json::json!({
                    "format": { "duration": info.duration.to_string() },
                    "thumbnailurl": info.thumbnail_template,
                }),
            ),
            ServerMessage::Eos => ("eos", serde_json::Value::Null),
            ServerMessage::Error(msg) => ("error", serde_json::json!(msg)),
            ServerMessage::Verbose(msg) => ("verbose", serde_json::json!(msg)),
        };
        let envelope = Envelope {
            event: event.to_string(),
            data,
        };
        Ok(WireFrame::Text(serde_json::to_string(&envelope)?))
    }
}

/// Transport-agnostic frame.
#[derive(Clone, Debug, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Why the duplex connection went away.
#[derive(Clone, Debug, PartialEq)]
pub enum DisconnectReason {
    /// Closed locally, part of a deliberate reset
    ClientDisconnect,
    /// The server closed the connection
    ServerDisconnect,
    /// The underlying stream ended without a close handshake
    TransportClose,
    TransportError(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError(_) => "transport error",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DisconnectReason::ClientDisconnect)
    }
}
