//! # Server Module
//!
//! TCP listener that hands every accepted device connection to its own
//! [`Session`] task.
//!
//! This module handles:
//! - Binding the configured listen address
//! - Spawning one independent task per connection
//! - Graceful shutdown: stop accepting, drain sessions, abort stragglers

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::identity::IdentityValidator;
use crate::session::{Session, SessionSettings};
use crate::storage::RecordSink;

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listening endpoint for tracking devices
pub struct Acceptor {
    listener: TcpListener,
    validator: Arc<dyn IdentityValidator>,
    sink: Arc<dyn RecordSink>,
    settings: SessionSettings,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Acceptor {
    /// Bind the listen address from `config`
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or cannot be bound
    pub async fn bind(
        config: &ServerConfig,
        validator: Arc<dyn IdentityValidator>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let addr = config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for devices on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            validator,
            sink,
            settings: SessionSettings::from(config),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` completes
    ///
    /// Each connection runs in its own task; the loop never waits on a
    /// session. After `shutdown` fires no new connections are accepted and
    /// running sessions get the grace period to finish before being aborted.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting devices");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "Accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%remote, "Failed to set TCP_NODELAY: {}", e);
                        }
                        let session = Session::new(
                            stream,
                            remote,
                            Arc::clone(&self.validator),
                            Arc::clone(&self.sink),
                            self.settings,
                        );
                        sessions.spawn(session.run());
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        drop(self.listener);
        drain(sessions, self.shutdown_grace).await;
        Ok(())
    }
}

async fn drain(mut sessions: JoinSet<crate::session::SessionStats>, grace: Duration) {
    if sessions.is_empty() {
        return;
    }

    info!("Waiting up to {:?} for {} active sessions", grace, sessions.len());
    let finished = tokio::time::timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        warn!("Aborting {} sessions still open after grace period", sessions.len());
        sessions.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec8::encoder::{encode_frame, encode_identity};
    use crate::codec8::protocol::{AvlRecord, Frame, Position};
    use crate::identity::{AcceptAll, ConfiguredValidator};
    use crate::config::IdentityConfig;
    use crate::storage::mocks::RecordingSink;
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_grace_secs: 1,
            ..ServerConfig::default()
        }
    }

    fn frame(count: u16) -> Vec<u8> {
        let records = (0..count)
            .map(|i| AvlRecord {
                timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + i64::from(i)).unwrap(),
                priority: 0,
                position: Position::from_raw(250_000_000, 545_000_000),
                angle: 0,
                speed: i,
                event_io_id: 0,
                io_elements: Vec::new(),
            })
            .collect();
        encode_frame(&Frame::new(records))
    }

    async fn connect(addr: SocketAddr, imei: &str) -> (TcpStream, u8) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&encode_identity(imei)).await.unwrap();
        let reply = stream.read_u8().await.unwrap();
        (stream, reply)
    }

    async fn send_frame(stream: &mut TcpStream, bytes: &[u8]) -> [u8; 4] {
        stream.write_all(bytes).await.unwrap();
        let mut ack = [0u8; 4];
        stream.read_exact(&mut ack).await.unwrap();
        ack
    }

    async fn start(
        validator: Arc<dyn IdentityValidator>,
        sink: Arc<RecordingSink>,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let acceptor = Acceptor::bind(&loopback_config(), validator, sink).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(acceptor.run(async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_end_to_end_exchange() {
        let sink = Arc::new(RecordingSink::new());
        let (addr, stop, handle) = start(Arc::new(AcceptAll), sink.clone()).await;

        let (mut stream, reply) = connect(addr, "356307042441013").await;
        assert_eq!(reply, 0x01);
        assert_eq!(send_frame(&mut stream, &frame(3)).await, [0, 0, 0, 3]);

        drop(stream);
        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0.as_str(), "356307042441013");
        assert_eq!(batches[0].1.len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_device_is_disconnected() {
        let validator = ConfiguredValidator::new(&IdentityConfig {
            allowed_devices: vec!["356307042441013".to_string()],
            require_imei_format: true,
        });
        let sink = Arc::new(RecordingSink::new());
        let (addr, stop, handle) = start(Arc::new(validator), sink.clone()).await;

        let (mut stream, reply) = connect(addr, "490154203237518").await;
        assert_eq!(reply, 0x00);

        // Server closes after the rejection byte; a frame gets no acknowledgement
        let _ = stream.write_all(&frame(1)).await;
        let mut rest = Vec::new();
        let read = stream.read_to_end(&mut rest).await;
        assert!(read.map(|n| n == 0).unwrap_or(true));

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let sink = Arc::new(RecordingSink::new());
        let (addr, stop, handle) = start(Arc::new(AcceptAll), sink.clone()).await;

        let (mut a, reply_a) = connect(addr, "111111111111111").await;
        let (mut b, reply_b) = connect(addr, "222222222222222").await;
        assert_eq!((reply_a, reply_b), (0x01, 0x01));

        // Malformed frame on A: dropped, no acknowledgement
        let mut bad = frame(2);
        let trailing = bad.len() - 5;
        bad[trailing] = 9;
        a.write_all(&bad).await.unwrap();
        // Let the session consume it as its own read
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(send_frame(&mut b, &frame(2)).await, [0, 0, 0, 2]);
        // A is still authenticated and accepts its next frame
        assert_eq!(send_frame(&mut a, &frame(1)).await, [0, 0, 0, 1]);
        assert_eq!(send_frame(&mut b, &frame(4)).await, [0, 0, 0, 4]);

        drop(a);
        drop(b);
        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let batches = sink.batches();
        let count_for = |imei: &str| -> Vec<usize> {
            batches
                .iter()
                .filter(|(device, _)| device.as_str() == imei)
                .map(|(_, records)| records.len())
                .collect()
        };
        assert_eq!(count_for("111111111111111"), vec![1]);
        assert_eq!(count_for("222222222222222"), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_idle_sessions_after_grace() {
        let sink = Arc::new(RecordingSink::new());
        let (addr, stop, handle) = start(Arc::new(AcceptAll), sink).await;

        // Authenticated but silent connection keeps its session alive
        let (_stream, reply) = connect(addr, "356307042441013").await;
        assert_eq!(reply, 0x01);

        stop.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Acceptor should finish once the grace period ends");
    }
}
