//! # Codec8 Frame Decoder
//!
//! Decodes Codec8 data frames into [`AvlRecord`]s.
//!
//! ```text
//! [0000 preamble][data length u32][codec u8][count u8][records...][count u8][crc u32]
//! ```
//!
//! A frame decodes completely or not at all. Header and trailer fields report
//! [`DecodeError::BufferUnderrun`]; fields inside a record report
//! [`DecodeError::FieldDecode`] with the record index and IO stage.

use chrono::{DateTime, Utc};

use super::cursor::FrameCursor;
use super::protocol::*;
use crate::error::{DecodeError, IoLocation, Underrun};

/// Decode a complete Codec8 data frame
///
/// # Arguments
///
/// * `payload` - Bytes of one socket read, starting at the preamble
///
/// # Returns
///
/// * `Result<Frame, DecodeError>` - Decoded frame, or the first failure
///
/// # Errors
///
/// Returns error if:
/// - Any field runs past the end of `payload`
/// - The trailing record count differs from the leading one
/// - A record timestamp is out of range
///
/// The declared data length, the codec id and the CRC are returned as read and
/// never checked.
pub fn decode_frame(payload: &[u8]) -> Result<Frame, DecodeError> {
    let mut cursor = FrameCursor::new(payload);

    cursor.skip(PREAMBLE_LEN).map_err(header("preamble"))?;
    let data_length = cursor.read_u32().map_err(header("data_length"))?;
    let codec_id = cursor.read_u8().map_err(header("codec_id"))?;
    let leading = cursor.read_u8().map_err(header("record_count"))?;

    let mut records = Vec::with_capacity(leading.into());
    for index in 0..usize::from(leading) {
        records.push(decode_record(&mut cursor, index)?);
    }

    let trailing = cursor
        .read_u8()
        .map_err(header("trailing_record_count"))?;
    if trailing != leading {
        return Err(DecodeError::CountMismatch { leading, trailing });
    }

    let crc = cursor.read_u32().map_err(header("crc"))?;

    Ok(Frame {
        data_length,
        codec_id,
        records,
        crc,
    })
}

/// Decode one AVL record starting at the cursor
///
/// # Arguments
///
/// * `cursor` - Cursor positioned at the record timestamp
/// * `index` - Record index within the frame, used in error context
pub fn decode_record(
    cursor: &mut FrameCursor<'_>,
    index: usize,
) -> Result<AvlRecord, DecodeError> {
    let field =
        |name: &'static str| move |source: Underrun| record_field(index, name, None, source);

    let millis = cursor.read_u64().map_err(field("timestamp"))?;
    let timestamp = timestamp_from_millis(millis).ok_or(DecodeError::InvalidTimestamp {
        record: index,
        millis,
    })?;
    let priority = cursor.read_u8().map_err(field("priority"))?;

    // Native i32 decode; no extra sign-bit handling on top
    let longitude = cursor.read_i32().map_err(field("longitude"))?;
    let latitude = cursor.read_i32().map_err(field("latitude"))?;
    cursor.skip(ALTITUDE_LEN).map_err(field("altitude"))?;
    let angle = cursor.read_u16().map_err(field("angle"))?;
    cursor.skip(SATELLITES_LEN).map_err(field("satellites"))?;
    let speed = cursor.read_u16().map_err(field("speed"))?;

    let (event_io_id, io_elements) = decode_io_group(cursor, index)?;

    Ok(AvlRecord {
        timestamp,
        priority,
        position: Position::from_raw(longitude, latitude),
        angle,
        speed,
        event_io_id,
        io_elements,
    })
}

/// Decode the IO element group that closes a record
///
/// Reads the event io id and the declared element total, then always exactly
/// four stages of widths [`IO_STAGE_WIDTHS`]. The declared total is not
/// compared with the stage counts.
///
/// # Returns
///
/// * `(event_io_id, elements)` - Elements in wire order across all stages
pub fn decode_io_group(
    cursor: &mut FrameCursor<'_>,
    record: usize,
) -> Result<(u8, Vec<IoElement>), DecodeError> {
    let event_io_id = cursor
        .read_u8()
        .map_err(|source| record_field(record, "event_io_id", None, source))?;
    let declared_total = cursor
        .read_u8()
        .map_err(|source| record_field(record, "io_total", None, source))?;

    let mut elements = Vec::with_capacity(declared_total.into());
    for width in IO_STAGE_WIDTHS {
        let stage = |element| Some(IoLocation { width, element });

        let count = cursor
            .read_u8()
            .map_err(|source| record_field(record, "io_count", stage(None), source))?;

        for element in 0..usize::from(count) {
            let id = cursor
                .read_u8()
                .map_err(|source| record_field(record, "io_id", stage(Some(element)), source))?;
            let value = read_io_value(cursor, width)
                .map_err(|source| record_field(record, "io_value", stage(Some(element)), source))?;
            elements.push(IoElement { id, value });
        }
    }

    Ok((event_io_id, elements))
}

fn read_io_value(cursor: &mut FrameCursor<'_>, width: usize) -> Result<IoValue, Underrun> {
    match width {
        1 => cursor.read_u8().map(IoValue::U8),
        2 => cursor.read_u16().map(IoValue::U16),
        4 => cursor.read_u32().map(IoValue::U32),
        _ => cursor.read_u64().map(IoValue::U64),
    }
}

/// Convert epoch milliseconds to a UTC instant
pub fn timestamp_from_millis(millis: u64) -> Option<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn header(field: &'static str) -> impl Fn(Underrun) -> DecodeError {
    move |source| DecodeError::BufferUnderrun { field, source }
}

fn record_field(
    record: usize,
    field: &'static str,
    io: Option<IoLocation>,
    source: Underrun,
) -> DecodeError {
    DecodeError::FieldDecode {
        record,
        field,
        io,
        source,
    }
}
