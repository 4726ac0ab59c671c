//! # Device Identity
//!
//! Handshake token handling and the validators that decide whether a device
//! may send data.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;

use crate::config::IdentityConfig;

/// Number of digits in an IMEI
pub const IMEI_LEN: usize = 15;

/// Outcome of validating a handshake token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Device identity captured from the handshake token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Derive the identity string from a raw handshake token
    ///
    /// Devices send a 2-byte big-endian length followed by the IMEI. When the
    /// prefix matches the rest of the token it is stripped; otherwise the whole
    /// token is taken as the identity.
    pub fn from_token(token: &[u8]) -> Self {
        let body = match token {
            [hi, lo, rest @ ..] if usize::from(u16::from_be_bytes([*hi, *lo])) == rest.len() => {
                rest
            }
            _ => token,
        };
        Self(String::from_utf8_lossy(body).trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `value` looks like an IMEI (15 ASCII digits)
pub fn is_imei(value: &str) -> bool {
    value.len() == IMEI_LEN && value.bytes().all(|b| b.is_ascii_digit())
}

/// Decides whether a device may proceed past the handshake
///
/// Implementations are shared by every session and must tolerate concurrent
/// calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Validate the raw handshake token
    async fn validate(&self, token: &[u8]) -> Verdict;
}

/// Validator that accepts every device
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl IdentityValidator for AcceptAll {
    async fn validate(&self, _token: &[u8]) -> Verdict {
        Verdict::Accepted
    }
}

/// Validator driven by the `[identity]` configuration section
#[derive(Debug, Clone, Default)]
pub struct ConfiguredValidator {
    allowed: HashSet<String>,
    require_imei_format: bool,
}

impl ConfiguredValidator {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            allowed: config.allowed_devices.iter().cloned().collect(),
            require_imei_format: config.require_imei_format,
        }
    }

    /// Check an already-derived identity
    pub fn check(&self, identity: &DeviceIdentity) -> Verdict {
        let id = identity.as_str();
        if id.is_empty() {
            return Verdict::Rejected;
        }
        if self.require_imei_format && !is_imei(id) {
            return Verdict::Rejected;
        }
        if !self.allowed.is_empty() && !self.allowed.contains(id) {
            return Verdict::Rejected;
        }
        Verdict::Accepted
    }
}

#[async_trait]
impl IdentityValidator for ConfiguredValidator {
    async fn validate(&self, token: &[u8]) -> Verdict {
        self.check(&DeviceIdentity::from_token(token))
    }
}
