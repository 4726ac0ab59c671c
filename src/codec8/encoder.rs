//! # Codec8 Frame Encoder
//!
//! Device-side encoding of the handshake token and of data frames. Used by
//! device simulators and tests to produce byte-exact Codec8 traffic.

use bytes::{BufMut, BytesMut};

use super::crc::crc16_ibm;
use super::protocol::*;

/// Encode a complete Codec8 data frame
///
/// The declared data length and the CRC are computed from the encoded
/// records; `frame.data_length` and `frame.crc` are ignored.
///
/// # Arguments
///
/// * `frame` - Frame to encode (at most 255 records)
///
/// # Returns
///
/// * `Vec<u8>` - Preamble, data length, data field and CRC
///
/// # Examples
///
/// ```
/// use avl_gateway::codec8::encoder::encode_frame;
/// use avl_gateway::codec8::protocol::Frame;
///
/// let bytes = encode_frame(&Frame::new(Vec::new()));
/// // preamble(4) + length(4) + codec(1) + count(1) + count(1) + crc(4)
/// assert_eq!(bytes.len(), 15);
/// ```
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let count = u8::try_from(frame.records.len()).unwrap_or(u8::MAX);

    // Data field: codec id through trailing record count
    let mut data = BytesMut::new();
    data.put_u8(frame.codec_id);
    data.put_u8(count);
    for record in frame.records.iter().take(usize::from(count)) {
        data.extend_from_slice(&encode_record(record));
    }
    data.put_u8(count);

    let mut out = BytesMut::with_capacity(PREAMBLE_LEN + 4 + data.len() + 4);
    out.put_bytes(0, PREAMBLE_LEN);
    out.put_u32(data.len() as u32);
    out.extend_from_slice(&data);
    out.put_u32(u32::from(crc16_ibm(&data)));

    out.to_vec()
}

/// Encode one AVL record
///
/// IO elements are written into the stage matching their width, keeping their
/// relative order. Altitude and satellite count are written as zero.
pub fn encode_record(record: &AvlRecord) -> Vec<u8> {
    let mut out = BytesMut::new();
    let (longitude, latitude) = record.position.to_raw();

    out.put_u64(record.timestamp.timestamp_millis() as u64);
    out.put_u8(record.priority);
    out.put_i32(longitude);
    out.put_i32(latitude);
    out.put_bytes(0, ALTITUDE_LEN);
    out.put_u16(record.angle);
    out.put_bytes(0, SATELLITES_LEN);
    out.put_u16(record.speed);

    out.put_u8(record.event_io_id);
    out.put_u8(u8::try_from(record.io_elements.len()).unwrap_or(u8::MAX));

    for width in IO_STAGE_WIDTHS {
        let stage: Vec<&IoElement> = record
            .io_elements
            .iter()
            .filter(|element| element.value.width() == width)
            .take(u8::MAX.into())
            .collect();

        out.put_u8(stage.len() as u8);
        for element in stage {
            out.put_u8(element.id);
            match element.value {
                IoValue::U8(v) => out.put_u8(v),
                IoValue::U16(v) => out.put_u16(v),
                IoValue::U32(v) => out.put_u32(v),
                IoValue::U64(v) => out.put_u64(v),
            }
        }
    }

    out.to_vec()
}

/// Encode a device identity handshake: 2-byte length followed by the IMEI
///
/// # Examples
///
/// ```
/// use avl_gateway::codec8::encoder::encode_identity;
///
/// let token = encode_identity("356307042441013");
/// assert_eq!(&token[..2], &[0x00, 0x0F]);
/// ```
pub fn encode_identity(imei: &str) -> Vec<u8> {
    let bytes = imei.as_bytes();
    let mut out = BytesMut::with_capacity(2 + bytes.len());
    out.put_u16(bytes.len() as u16);
    out.extend_from_slice(bytes);
    out.to_vec()
}
