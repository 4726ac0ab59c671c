//! # AVL Gateway Library
//!
//! Passive TCP listener for GPS/AVL tracking devices speaking Codec8.
//!
//! This library provides the binary frame decoder, the per-connection
//! handshake state machine and the listener that runs one session per device,
//! plus default identity validators, record sinks and place matching.

pub mod codec8;
pub mod config;
pub mod error;
pub mod identity;
pub mod places;
pub mod server;
pub mod session;
pub mod storage;
