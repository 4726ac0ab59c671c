//! # Record Storage Module
//!
//! Destinations for decoded AVL records.
//!
//! This module handles:
//! - The [`RecordSink`] interface sessions forward decoded frames to
//! - Logging records through `tracing` when file storage is disabled
//! - Writing records as JSON Lines with file rotation ([`jsonl`])
//! - Tagging records with the configured places they fall inside

pub mod jsonl;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec8::protocol::AvlRecord;
use crate::config::StorageConfig;
use crate::error::Result;
use crate::identity::DeviceIdentity;
use crate::places::PlaceRegistry;

pub use jsonl::JsonlSink;

/// Destination for decoded records
///
/// One handle is shared by every session, so implementations must accept
/// concurrent calls.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist the records of one frame for `device`
    async fn store(&self, device: &DeviceIdentity, records: &[AvlRecord]) -> Result<()>;
}

/// Sink that only logs the records it receives
#[derive(Debug, Default, Clone)]
pub struct TracingSink {
    places: Arc<PlaceRegistry>,
}

impl TracingSink {
    pub fn new(places: Arc<PlaceRegistry>) -> Self {
        Self { places }
    }
}

#[async_trait]
impl RecordSink for TracingSink {
    async fn store(&self, device: &DeviceIdentity, records: &[AvlRecord]) -> Result<()> {
        info!(%device, records = records.len(), "Received AVL records");
        for record in records {
            debug!(
                %device,
                time = %record.timestamp,
                lon = record.position.longitude,
                lat = record.position.latitude,
                angle = record.angle,
                speed = record.speed,
                io = record.io_elements.len(),
                places = ?place_ids(&self.places, record),
                "AVL record"
            );
        }
        Ok(())
    }
}

/// Ids of the places `record` lies inside
pub fn place_ids<'a>(places: &'a PlaceRegistry, record: &AvlRecord) -> Vec<&'a str> {
    places
        .containing(&record.position)
        .map(|place| place.internal_id.as_str())
        .collect()
}

/// Build the sink selected by the `[storage]` configuration section
pub fn from_config(
    config: &StorageConfig,
    places: Arc<PlaceRegistry>,
) -> Result<Arc<dyn RecordSink>> {
    if config.enabled {
        Ok(Arc::new(JsonlSink::open(config, places)?))
    } else {
        Ok(Arc::new(TracingSink::new(places)))
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::Mutex;

    /// Sink recording every batch it receives
    #[derive(Default)]
    pub struct RecordingSink {
        pub batches: Mutex<Vec<(DeviceIdentity, Vec<AvlRecord>)>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sink that records the batch and then reports a failure
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn batches(&self) -> Vec<(DeviceIdentity, Vec<AvlRecord>)> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        async fn store(&self, device: &DeviceIdentity, records: &[AvlRecord]) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push((device.clone(), records.to_vec()));
            if self.fail {
                return Err(GatewayError::Sink("Mock store error".to_string()));
            }
            Ok(())
        }
    }
}
