//! # CRC-16/IBM Implementation
//!
//! Checksum Codec8 devices append to every data frame, computed over the
//! codec id through the trailing record count.
//!
//! **Polynomial**: 0xA001 (reflected 0x8005)
//! **Initial Value**: 0x0000
//!
//! The decoder carries the received value through untouched; only the encoder
//! computes it.

/// CRC-16/IBM reflected polynomial
const CRC16_POLY: u16 = 0xA001;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the CRC-16/IBM checksum of `data`
///
/// # Examples
///
/// ```
/// use avl_gateway::codec8::crc::crc16_ibm;
///
/// assert_eq!(crc16_ibm(b"123456789"), 0xBB3D);
/// ```
pub fn crc16_ibm(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        let index = ((crc ^ byte as u16) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC16_TABLE[index];
    }

    crc
}

/// Bit-by-bit reference implementation
#[cfg(test)]
fn crc16_ibm_slow(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
