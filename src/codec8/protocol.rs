//! # Codec8 Protocol Constants and Types
//!
//! Core protocol definitions for the Codec8 AVL data format.

use chrono::{DateTime, Utc};

/// Codec identifier carried by Codec8 frames
pub const CODEC_8_ID: u8 = 0x08;

/// Zero padding at the start of every data frame
pub const PREAMBLE_LEN: usize = 4;

/// Handshake reply accepting the device
pub const IDENTITY_ACCEPTED: u8 = 0x01;

/// Handshake reply rejecting the device
pub const IDENTITY_REJECTED: u8 = 0x00;

/// Value widths of the IO element stages, in wire order
pub const IO_STAGE_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Coordinates are transmitted as degrees × 10^7
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Bytes skipped for the altitude field
pub const ALTITUDE_LEN: usize = 2;

/// Bytes skipped for the satellite count field
pub const SATELLITES_LEN: usize = 1;

/// Longitude/latitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Longitude in degrees
    pub longitude: f64,

    /// Latitude in degrees
    pub latitude: f64,
}

impl Position {
    /// Build a position from the raw wire integers (degrees × 10^7)
    pub fn from_raw(longitude: i32, latitude: i32) -> Self {
        Self {
            longitude: longitude as f64 / COORDINATE_SCALE,
            latitude: latitude as f64 / COORDINATE_SCALE,
        }
    }

    /// Raw wire integers `(longitude, latitude)` for this position
    pub fn to_raw(&self) -> (i32, i32) {
        (
            (self.longitude * COORDINATE_SCALE).round() as i32,
            (self.latitude * COORDINATE_SCALE).round() as i32,
        )
    }
}

/// Value of one IO element, tagged by its wire width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl IoValue {
    /// Wire width of the value in bytes
    pub fn width(&self) -> usize {
        match self {
            IoValue::U8(_) => 1,
            IoValue::U16(_) => 2,
            IoValue::U32(_) => 4,
            IoValue::U64(_) => 8,
        }
    }

    /// Value widened to 64 bits
    pub fn as_u64(&self) -> u64 {
        match *self {
            IoValue::U8(v) => v.into(),
            IoValue::U16(v) => v.into(),
            IoValue::U32(v) => v.into(),
            IoValue::U64(v) => v,
        }
    }
}

/// Device-reported sensor key/value pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoElement {
    /// Element id
    pub id: u8,

    /// Element value
    pub value: IoValue,
}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct AvlRecord {
    /// Sample time
    pub timestamp: DateTime<Utc>,

    /// Record priority (uninterpreted)
    pub priority: u8,

    /// GPS position
    pub position: Position,

    /// Heading in degrees
    pub angle: u16,

    /// Speed in the device unit (km/h in practice)
    pub speed: u16,

    /// Id of the IO element that triggered the record (uninterpreted)
    pub event_io_id: u8,

    /// IO elements in wire order
    pub io_elements: Vec<IoElement>,
}

/// One decoded data frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Declared payload length (informational)
    pub data_length: u32,

    /// Codec identifier (informational)
    pub codec_id: u8,

    /// Records in wire order
    pub records: Vec<AvlRecord>,

    /// Trailing checksum (not validated)
    pub crc: u32,
}

impl Frame {
    /// Create a Codec8 frame around `records`
    ///
    /// `data_length` and `crc` are left at zero; the encoder computes both.
    pub fn new(records: Vec<AvlRecord>) -> Self {
        Self {
            data_length: 0,
            codec_id: CODEC_8_ID,
            records,
            crc: 0,
        }
    }
}

/// Data acknowledgement for a frame carrying `record_count` records
///
/// The count occupies the last byte and saturates at 255.
pub fn record_ack(record_count: usize) -> [u8; 4] {
    let count = u8::try_from(record_count).unwrap_or(u8::MAX);
    [0, 0, 0, count]
}
