//! # Codec8 Protocol Module
//!
//! Implementation of the Codec8 AVL data protocol used by GPS tracking devices.
//!
//! This module handles:
//! - Big-endian field reads over a received frame
//! - Frame, record and IO element group decoding
//! - Device-side frame and handshake encoding
//! - CRC-16/IBM checksum calculation

pub mod crc;
pub mod cursor;
pub mod decoder;
pub mod encoder;
pub mod protocol;
