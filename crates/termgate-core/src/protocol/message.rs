//! Top-level protocol message enum.
//!
//! Control messages and terminal data share one ordered stream, so a resize
//! is always observed in the position the client sent it relative to input.

use serde::{Deserialize, Serialize};

use super::types::{Geometry, SessionId};

/// Client request to open the interactive channel. Must be the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPayload {
    /// Terminal type (e.g. "xterm-256color").
    pub term_type: String,
    /// Initial terminal geometry.
    pub geometry: Geometry,
    /// Environment variables requested by the client.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Server acknowledgment of `Open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAckPayload {
    pub session_id: SessionId,
}

/// Terminal bytes, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    pub data: Vec<u8>,
}

/// Handler exit status, sent before the server finishes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPayload {
    pub status: i32,
}

/// Top-level protocol message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // =========================================================================
    // Channel setup
    // =========================================================================
    /// Client opens the interactive channel.
    Open(OpenPayload),
    /// Server accepted the channel.
    OpenAck(OpenAckPayload),

    // =========================================================================
    // Channel traffic
    // =========================================================================
    /// Terminal input (client -> server) or output (server -> client).
    Data(DataPayload),
    /// Terminal geometry changed (client -> server).
    Resize(Geometry),
    /// Client closed its output half.
    Eof,
    /// Session handler finished (server -> client).
    Exit(ExitPayload),
}

impl Message {
    /// Convenience constructor for a data frame.
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Message::Data(DataPayload { data: bytes.into() })
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Open(_) => "Open",
            Message::OpenAck(_) => "OpenAck",
            Message::Data(_) => "Data",
            Message::Resize(_) => "Resize",
            Message::Eof => "Eof",
            Message::Exit(_) => "Exit",
        }
    }
}
