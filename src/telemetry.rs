//! Local JSONL journal of pipeline runs. Events queue in memory and are
//! appended to `telemetry-buffer.jsonl` in batches; the file rotates by size.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::AppResult;

const BUFFER_FILE_NAME: &str = "telemetry-buffer.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", content = "payload", rename_all = "snake_case")]
pub enum PipelineEvent {
    TourEnriched {
        destination: String,
        days: usize,
        unique_queries: usize,
        resolved: usize,
    },
    TourFailed {
        tour: String,
        reason: String,
    },
    BatchComplete {
        processed: usize,
        failed: usize,
        skipped: usize,
        cancelled: bool,
    },
}

#[derive(Debug, Serialize)]
struct JournalLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: PipelineEvent,
}

#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<JournalLine>>>,
    buffer: Arc<BufferFile>,
    batch_size: usize,
}

impl TelemetryClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let buffer = BufferFile {
            path: config.data_dir.join(BUFFER_FILE_NAME),
            max_bytes: config.telemetry_buffer_max_bytes,
            max_files: config.telemetry_buffer_max_files,
        };
        buffer.touch()?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled_by_default)),
            pending: Arc::new(Mutex::new(Vec::new())),
            buffer: Arc::new(buffer),
            batch_size: config.telemetry_batch_size.max(1),
        })
    }

    /// Queues the event and writes the batch once it is full. On a failed
    /// write the events stay queued for the next attempt.
    pub fn record(&self, event: PipelineEvent) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut pending = self.pending.lock();
        pending.push(JournalLine {
            timestamp: Utc::now(),
            event,
        });
        if pending.len() >= self.batch_size {
            self.write_pending(&mut pending)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut pending = self.pending.lock();
        self.write_pending(&mut pending)
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer.path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn write_pending(&self, pending: &mut Vec<JournalLine>) -> AppResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::new();
        for line in pending.iter() {
            serde_json::to_writer(&mut payload, line)?;
            payload.push(b'\n');
        }
        self.buffer.append(&payload)?;
        debug!(events = pending.len(), "telemetry batch written");
        pending.clear();
        Ok(())
    }
}

struct BufferFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
}

impl BufferFile {
    fn touch(&self) -> AppResult<()> {
        OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn append(&self, payload: &[u8]) -> AppResult<()> {
        self.rotate_before(payload.len() as u64)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(payload)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_before(&self, incoming: u64) -> AppResult<()> {
        let current = fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0);
        if current + incoming <= self.max_bytes {
            return Ok(());
        }

        if self.max_files > 1 && self.path.exists() {
            let rotated = self.directory().join(format!(
                "{}-{}.jsonl",
                self.stem(),
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            fs::rename(&self.path, &rotated)?;
            self.prune()?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Keeps the newest `max_files - 1` rotated files next to the live one.
    fn prune(&self) -> AppResult<()> {
        let prefix = format!("{}-", self.stem());
        let mut rotated: Vec<_> = fs::read_dir(self.directory())?
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(".jsonl")
            })
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        rotated.sort();
        let keep = self.max_files.saturating_sub(1);
        let excess = rotated.len().saturating_sub(keep);
        for (_, path) in rotated.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "telemetry-buffer".into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::tempdir;

    use super::*;
    use crate::config::test_config;

    fn failed(tour: &str) -> PipelineEvent {
        PipelineEvent::TourFailed {
            tour: tour.into(),
            reason: "model response is not valid JSON".into(),
        }
    }

    #[test]
    fn writes_a_batch_once_full() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(&test_config(dir.path())).unwrap();

        client.record(failed("Hue")).unwrap();
        assert_eq!(client.pending(), 1);
        client
            .record(PipelineEvent::BatchComplete {
                processed: 1,
                failed: 1,
                skipped: 0,
                cancelled: false,
            })
            .unwrap();
        assert_eq!(client.pending(), 0);

        let lines: Vec<Value> = fs::read_to_string(client.buffer_path())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "tour_failed");
        assert_eq!(lines[0]["payload"]["tour"], "Hue");
        assert_eq!(lines[1]["name"], "batch_complete");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[test]
    fn appends_across_instances() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let client = TelemetryClient::new(&config).unwrap();
            client.record(failed("first")).unwrap();
            client.flush().unwrap();
        }
        let client = TelemetryClient::new(&config).unwrap();
        client.record(failed("second")).unwrap();
        client.flush().unwrap();

        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("first") && buffer.contains("second"));
    }

    #[test]
    fn disabled_client_records_nothing() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(&test_config(dir.path())).unwrap();
        client.set_enabled(false);
        client.record(failed("ignored")).unwrap();
        assert_eq!(client.pending(), 0);
    }

    #[test]
    fn rotates_and_prunes_old_files() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.telemetry_buffer_max_bytes = 64;
        config.telemetry_batch_size = 1;
        let client = TelemetryClient::new(&config).unwrap();

        for idx in 0..6 {
            client.record(failed(&format!("tour-{idx}"))).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("telemetry-buffer-"))
            .count();
        assert!(rotated >= 1);
        assert!(rotated <= config.telemetry_buffer_max_files - 1);
    }

    #[test]
    fn failed_write_keeps_events_queued() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.telemetry_batch_size = 1;
        config.telemetry_buffer_max_bytes = 1 << 20;
        let client = TelemetryClient::new(&config).unwrap();

        fs::remove_file(client.buffer_path()).unwrap();
        fs::create_dir(client.buffer_path()).unwrap();

        assert!(client.record(failed("blocked")).is_err());
        assert_eq!(client.pending(), 1);
    }
}
