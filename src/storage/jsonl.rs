//! JSON Lines record storage with file rotation.
//!
//! Each record becomes one document:
//!
//! ```text
//! {"imei":"356307042441013","location":{"type":"Point","coordinates":[25.0,54.5]},
//!  "time":"2023-11-14T22:13:20Z","angle":90,"speed":42,"priority":1,"event_io_id":0,
//!  "io":[{"id":239,"width":1,"value":1}]}
//! ```
//!
//! Records inside configured places also carry `"places":["depot",...]`.
//!
//! Files are named `records_<UTC timestamp>_<seq>.jsonl`. A new file is started
//! after `max_records_per_file` records and only the newest `max_files_to_keep`
//! files are retained. File writes, rotation and pruning run on the blocking
//! thread pool so a slow disk never stalls the sessions sharing the sink.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{place_ids, RecordSink};
use crate::codec8::protocol::{AvlRecord, IoElement};
use crate::config::StorageConfig;
use crate::error::{GatewayError, Result};
use crate::identity::DeviceIdentity;
use crate::places::PlaceRegistry;

const FILE_PREFIX: &str = "records_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
struct GeoPoint {
    #[serde(rename = "type")]
    kind: &'static str,
    /// `[longitude, latitude]`
    coordinates: [f64; 2],
}

#[derive(Serialize)]
struct StoredIo {
    id: u8,
    width: usize,
    value: u64,
}

impl From<&IoElement> for StoredIo {
    fn from(element: &IoElement) -> Self {
        Self {
            id: element.id,
            width: element.value.width(),
            value: element.value.as_u64(),
        }
    }
}

#[derive(Serialize)]
struct StoredRecord<'a> {
    imei: &'a str,
    location: GeoPoint,
    time: String,
    angle: u16,
    speed: u16,
    priority: u8,
    event_io_id: u8,
    io: Vec<StoredIo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    places: Vec<&'a str>,
}

impl<'a> StoredRecord<'a> {
    fn new(device: &'a DeviceIdentity, record: &AvlRecord, places: &'a PlaceRegistry) -> Self {
        Self {
            imei: device.as_str(),
            location: GeoPoint {
                kind: "Point",
                coordinates: [record.position.longitude, record.position.latitude],
            },
            time: record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            angle: record.angle,
            speed: record.speed,
            priority: record.priority,
            event_io_id: record.event_io_id,
            io: record.io_elements.iter().map(StoredIo::from).collect(),
            places: place_ids(places, record),
        }
    }
}

/// Rotating JSON Lines file sink
///
/// Documents are serialized by the calling task. Writing them happens on the
/// blocking pool, one batch at a time, and each batch is flushed before
/// `store` returns.
pub struct JsonlSink {
    writer: Arc<Mutex<RotatingWriter>>,
    places: Arc<PlaceRegistry>,
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink")
            .field("places", &self.places.len())
            .finish_non_exhaustive()
    }
}

impl JsonlSink {
    /// Open the sink, creating the log directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open(config: &StorageConfig, places: Arc<PlaceRegistry>) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;
        info!("Storing AVL records under {}", dir.display());

        Ok(Self {
            writer: Arc::new(Mutex::new(RotatingWriter {
                dir,
                max_records_per_file: config.max_records_per_file.max(1),
                max_files_to_keep: config.max_files_to_keep.max(1),
                current: None,
                records_in_file: 0,
                sequence: 0,
            })),
            places,
        })
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn store(&self, device: &DeviceIdentity, records: &[AvlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let lines = records
            .iter()
            .map(|record| serde_json::to_vec(&StoredRecord::new(device, record, &self.places)))
            .collect::<serde_json::Result<Vec<_>>>()?;

        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| GatewayError::Sink("record writer lock poisoned".to_string()))?;
            writer.write_lines(&lines)
        })
        .await
        .map_err(|e| GatewayError::Sink(format!("record writer task failed: {}", e)))??;

        debug!(%device, records = records.len(), "Stored AVL records");
        Ok(())
    }
}

struct RotatingWriter {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    current: Option<BufWriter<File>>,
    records_in_file: usize,
    sequence: u64,
}

impl RotatingWriter {
    /// Append one serialized document per line
    fn write_lines(&mut self, lines: &[Vec<u8>]) -> Result<()> {
        for line in lines {
            let out = self.writer_with_room()?;
            out.write_all(line)?;
            out.write_all(b"\n")?;
            self.records_in_file += 1;
        }
        if let Some(out) = self.current.as_mut() {
            out.flush()?;
        }
        Ok(())
    }

    fn writer_with_room(&mut self) -> Result<&mut BufWriter<File>> {
        if self.current.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate(Utc::now())?;
        }
        self.current
            .as_mut()
            .ok_or_else(|| GatewayError::Sink("no open record file".to_string()))
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut previous) = self.current.take() {
            previous.flush()?;
        }

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            now.format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_EXTENSION
        );
        self.sequence += 1;

        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened record file {}", path.display());

        self.current = Some(BufWriter::new(file));
        self.records_in_file = 0;
        prune(&self.dir, self.max_files_to_keep)
    }
}

/// Record files in `dir`, oldest first
fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(FILE_PREFIX));
            is_record && path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn prune(dir: &Path, keep: usize) -> Result<()> {
    let files = record_files(dir)?;
    let excess = files.len().saturating_sub(keep);
    for path in &files[..excess] {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove old record file {}: {}", path.display(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec8::protocol::{IoValue, Position};
    use crate::config::{PlaceConfig, PlacesConfig};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn config(dir: &Path, per_file: usize, keep: usize) -> StorageConfig {
        StorageConfig {
            enabled: true,
            log_dir: dir.to_string_lossy().into_owned(),
            max_records_per_file: per_file,
            max_files_to_keep: keep,
        }
    }

    fn record(speed: u16) -> AvlRecord {
        AvlRecord {
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            priority: 1,
            position: Position::from_raw(250_000_000, 545_000_000),
            angle: 90,
            speed,
            event_io_id: 0,
            io_elements: vec![IoElement {
                id: 239,
                value: IoValue::U8(1),
            }],
        }
    }

    fn read_lines(dir: &Path) -> Vec<serde_json::Value> {
        record_files(dir)
            .unwrap()
            .iter()
            .flat_map(|path| {
                fs::read_to_string(path)
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_store_writes_geojson_documents() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::open(&config(dir.path(), 100, 5), Arc::default()).unwrap();
        let device = DeviceIdentity::from("356307042441013");

        sink.store(&device, &[record(42)]).await.unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 1);
        let doc = &lines[0];
        assert_eq!(doc["imei"], "356307042441013");
        assert_eq!(doc["location"]["type"], "Point");
        assert_eq!(doc["location"]["coordinates"][0], 25.0);
        assert_eq!(doc["location"]["coordinates"][1], 54.5);
        assert_eq!(doc["time"], "2023-11-14T22:13:20.000Z");
        assert_eq!(doc["angle"], 90);
        assert_eq!(doc["speed"], 42);
        assert_eq!(doc["io"][0]["id"], 239);
        assert_eq!(doc["io"][0]["width"], 1);
        assert_eq!(doc["io"][0]["value"], 1);
        assert!(doc.get("places").is_none());
    }

    #[tokio::test]
    async fn test_store_tags_records_with_places() {
        let dir = tempfile::tempdir().unwrap();
        let places = PlaceRegistry::new(&PlacesConfig {
            entries: vec![PlaceConfig {
                internal_id: "depot".to_string(),
                longitude: 25.0,
                latitude: 54.5,
                radius: 250.0,
            }],
        });
        let sink = JsonlSink::open(&config(dir.path(), 100, 5), Arc::new(places)).unwrap();
        let device = DeviceIdentity::from("356307042441013");

        let mut away = record(7);
        away.position = Position::from_raw(-37_000_000, 404_000_000);
        sink.store(&device, &[record(3), away]).await.unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines[0]["places"], serde_json::json!(["depot"]));
        assert!(lines[1].get("places").is_none());
    }

    #[tokio::test]
    async fn test_store_leaves_runtime_free_for_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::open(&config(dir.path(), 1000, 50), Arc::default()).unwrap();
        let device = DeviceIdentity::from("356307042441013");
        let records: Vec<AvlRecord> = (0..255).map(record).collect();

        // Single-threaded runtime: the ticker only runs while `store` is suspended
        let ticks = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            let done = Arc::clone(&done);
            async move {
                while !done.load(Ordering::Relaxed) {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        for _ in 0..10 {
            sink.store(&device, &records).await.unwrap();
        }
        done.store(true, Ordering::Relaxed);
        ticker.await.unwrap();

        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert_eq!(read_lines(dir.path()).len(), 2550);
    }

    #[tokio::test]
    async fn test_store_empty_batch_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::open(&config(dir.path(), 100, 5), Arc::default()).unwrap();

        sink.store(&DeviceIdentity::from("x"), &[]).await.unwrap();
        assert!(record_files(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_and_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::open(&config(dir.path(), 2, 2), Arc::default()).unwrap();
        let device = DeviceIdentity::from("356307042441013");

        let records: Vec<AvlRecord> = (0..7).map(record).collect();
        sink.store(&device, &records).await.unwrap();

        // 7 records at 2 per file = 4 files, oldest two pruned
        let files = record_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);

        let speeds: Vec<u64> = read_lines(dir.path())
            .iter()
            .map(|doc| doc["speed"].as_u64().unwrap())
            .collect();
        assert_eq!(speeds, vec![4, 5, 6]);
    }

    #[test]
    fn test_prune_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        fs::write(dir.path().join("records_20240101_000000_0000.jsonl"), "").unwrap();
        fs::write(dir.path().join("records_20240101_000000_0001.jsonl"), "").unwrap();

        prune(dir.path(), 1).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        let files = record_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("records_20240101_000000_0001.jsonl"));
    }
}
