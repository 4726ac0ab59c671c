//! # Session Module
//!
//! Per-connection Codec8 protocol state machine.
//!
//! ```text
//! AwaitingIdentity --accepted (0x01)--> Authenticated --frame--> Authenticated
//!        |                                    |
//!        +--rejected (0x00) / I/O error-------+--EOF / I/O error / idle--> Closed
//! ```
//!
//! Each socket read is one logical message: the identity token while
//! `AwaitingIdentity`, then one data frame per read. A frame is decoded,
//! forwarded to the [`RecordSink`] as one batch and acknowledged with
//! `[0, 0, 0, count]` before the next read starts. Malformed frames are dropped
//! without an acknowledgement and the session stays authenticated.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::codec8::decoder::decode_frame;
use crate::codec8::protocol::{record_ack, CODEC_8_ID, IDENTITY_ACCEPTED, IDENTITY_REJECTED};
use crate::config::ServerConfig;
use crate::error::{GatewayError, Result};
use crate::identity::{DeviceIdentity, IdentityValidator, Verdict};
use crate::storage::RecordSink;

/// Observable protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingIdentity,
    Authenticated,
    Closed,
}

/// Per-session tuning taken from the server configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Size of the buffer one read lands in
    pub read_buffer_size: usize,

    /// Close the session when no data arrives for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Counters reported when a session closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub records_forwarded: u64,
    pub sink_failures: u64,
}

enum Phase {
    AwaitingIdentity,
    Authenticated(DeviceIdentity),
    Closed,
}

/// One device connection
///
/// Generic over the transport so tests can drive it with in-memory streams.
pub struct Session<S> {
    stream: S,
    remote: SocketAddr,
    phase: Phase,
    validator: Arc<dyn IdentityValidator>,
    sink: Arc<dyn RecordSink>,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
    stats: SessionStats,
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("remote", &self.remote)
            .field("state", &self.state())
            .field("device", &self.device_identity())
            .finish_non_exhaustive()
    }
}

impl<S> Session<S> {
    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::AwaitingIdentity => SessionState::AwaitingIdentity,
            Phase::Authenticated(_) => SessionState::Authenticated,
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Identity captured during the handshake, once authenticated
    pub fn device_identity(&self) -> Option<&DeviceIdentity> {
        match &self.phase {
            Phase::Authenticated(device) => Some(device),
            _ => None,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        remote: SocketAddr,
        validator: Arc<dyn IdentityValidator>,
        sink: Arc<dyn RecordSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            stream,
            remote,
            phase: Phase::AwaitingIdentity,
            validator,
            sink,
            buffer: vec![0u8; settings.read_buffer_size.max(1)],
            idle_timeout: settings.idle_timeout,
            stats: SessionStats::default(),
        }
    }

    /// Drive the session until it closes
    pub async fn run(mut self) -> SessionStats {
        debug!(remote = %self.remote, "Session started");
        while self.step().await != SessionState::Closed {}

        let stats = self.stats;
        info!(
            remote = %self.remote,
            frames = stats.frames_accepted,
            dropped = stats.frames_dropped,
            records = stats.records_forwarded,
            sink_failures = stats.sink_failures,
            "Session closed"
        );
        stats
    }

    /// Perform one read and handle it completely
    ///
    /// # Returns
    ///
    /// * `SessionState` - State after the read was handled
    pub async fn step(&mut self) -> SessionState {
        if matches!(self.phase, Phase::Closed) {
            return SessionState::Closed;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        let outcome = self.process_next(&mut buffer).await;
        self.buffer = buffer;

        if let Err(e) = outcome {
            match &e {
                GatewayError::ConnectionClosed => {
                    debug!(remote = %self.remote, "Peer closed connection")
                }
                GatewayError::IdentityRejected(_) => info!(remote = %self.remote, "{}", e),
                _ => warn!(remote = %self.remote, "Closing session: {}", e),
            }
            self.close().await;
        }

        self.state()
    }

    async fn process_next(&mut self, buffer: &mut [u8]) -> Result<()> {
        let len = self.read(buffer).await?;
        let payload = &buffer[..len];

        // The identity is moved out for the duration of the frame and put back
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::AwaitingIdentity => {
                self.phase = Phase::AwaitingIdentity;
                self.authenticate(payload).await
            }
            Phase::Authenticated(device) => {
                let outcome = self.receive_frame(&device, payload).await;
                self.phase = Phase::Authenticated(device);
                outcome
            }
            Phase::Closed => Ok(()),
        }
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let len = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.read(buffer))
                .await
                .map_err(|_| GatewayError::IdleTimeout(limit))??,
            None => self.stream.read(buffer).await?,
        };

        if len == 0 {
            return Err(GatewayError::ConnectionClosed);
        }
        Ok(len)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn authenticate(&mut self, token: &[u8]) -> Result<()> {
        let device = DeviceIdentity::from_token(token);

        match self.validator.validate(token).await {
            Verdict::Accepted => {
                self.write(&[IDENTITY_ACCEPTED]).await?;
                info!(remote = %self.remote, %device, "Device authenticated");
                self.phase = Phase::Authenticated(device);
                Ok(())
            }
            Verdict::Rejected => {
                self.write(&[IDENTITY_REJECTED]).await?;
                Err(GatewayError::IdentityRejected(device.to_string()))
            }
        }
    }

    async fn receive_frame(&mut self, device: &DeviceIdentity, payload: &[u8]) -> Result<()> {
        let frame = match decode_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frames_dropped += 1;
                warn!(remote = %self.remote, %device, len = payload.len(), "Dropping frame: {}", e);
                return Ok(());
            }
        };

        if frame.codec_id != CODEC_8_ID {
            warn!(%device, codec = frame.codec_id, "Unexpected codec id, decoding as Codec8");
        }

        let count = frame.records.len();
        if let Err(e) = self.sink.store(device, &frame.records).await {
            self.stats.sink_failures += 1;
            warn!(%device, records = count, "Failed to store records: {}", e);
        }

        self.write(&record_ack(count)).await?;

        self.stats.frames_accepted += 1;
        self.stats.records_forwarded += count as u64;
        debug!(%device, records = count, "Frame acknowledged");
        Ok(())
    }

    async fn close(&mut self) {
        self.phase = Phase::Closed;
        if let Err(e) = self.stream.shutdown().await {
            debug!(remote = %self.remote, "Socket shutdown failed: {}", e);
        }
    }
}
