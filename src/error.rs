//! # Error Types
//!
//! Custom error types for AVL Gateway using `thiserror`.
//!
//! Decoding failures ([`DecodeError`]) are recoverable per frame; the session
//! drops the frame and keeps the connection. Everything else surfaces through
//! [`GatewayError`].

use std::time::Duration;
use thiserror::Error;

/// Fewer bytes remained in the frame buffer than a read required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer underrun at offset {offset}: needed {needed} bytes, {remaining} remaining")]
pub struct Underrun {
    /// Cursor position when the read was attempted
    pub offset: usize,
    /// Bytes the read required
    pub needed: usize,
    /// Bytes left in the buffer
    pub remaining: usize,
}

/// Location of a failing read inside a record's IO element group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLocation {
    /// Value width of the stage (1, 2, 4 or 8 bytes)
    pub width: usize,
    /// Element index within the stage, `None` for the stage count byte
    pub element: Option<usize>,
}

impl std::fmt::Display for IoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.element {
            Some(index) => write!(f, "io stage {}B element {}", self.width, index),
            None => write!(f, "io stage {}B count", self.width),
        }
    }
}

fn io_suffix(io: &Option<IoLocation>) -> String {
    io.map(|location| format!(" ({location})")).unwrap_or_default()
}

/// Codec8 frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A frame header or trailer field ran past the end of the buffer
    #[error("truncated frame reading `{field}`: {source}")]
    BufferUnderrun {
        field: &'static str,
        #[source]
        source: Underrun,
    },

    /// A field inside a record ran past the end of the buffer
    #[error("record {record}: truncated `{field}`{}: {source}", io_suffix(.io))]
    FieldDecode {
        record: usize,
        field: &'static str,
        io: Option<IoLocation>,
        #[source]
        source: Underrun,
    },

    /// Trailing record count disagrees with the leading one
    #[error("record count mismatch: header declares {leading}, trailer declares {trailing}")]
    CountMismatch { leading: u8, trailing: u8 },

    /// Timestamp cannot be represented as a UTC instant
    #[error("record {record}: timestamp {millis} ms is out of range")]
    InvalidTimestamp { record: usize, millis: u64 },
}

impl DecodeError {
    /// Name of the field that failed, if the error concerns a single field
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DecodeError::BufferUnderrun { field, .. } | DecodeError::FieldDecode { field, .. } => {
                Some(field)
            }
            DecodeError::InvalidTimestamp { .. } => Some("timestamp"),
            DecodeError::CountMismatch { .. } => None,
        }
    }
}

/// Main error type for AVL Gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed Codec8 frame
    #[error("Codec8 decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Handshake token refused by the identity validator
    #[error("Device identity rejected: {0}")]
    IdentityRejected(String),

    /// Record sink could not persist a batch
    #[error("Record sink error: {0}")]
    Sink(String),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No data arrived within the idle limit
    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Record serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AVL Gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
