use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::errors::AppResult;
use crate::model::GeneratedData;

/// Processed tours of one session, newest first, at most one per destination.
#[derive(Debug, Clone, Default)]
pub struct TourCollection {
    entries: Vec<GeneratedData>,
}

impl TourCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a previous export so its destinations count as processed.
    pub fn load(path: &Path) -> AppResult<Self> {
        let bytes = fs::read(path)?;
        let entries: Vec<GeneratedData> = serde_json::from_slice(&bytes)?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GeneratedData] {
        &self.entries
    }

    /// Replaces the entry with the same destination, else inserts at the front.
    pub fn upsert(&mut self, data: GeneratedData) {
        let existing = data.destination().and_then(|destination| {
            self.entries
                .iter()
                .position(|entry| entry.destination() == Some(destination))
        });
        match existing {
            Some(index) => self.entries[index] = data,
            None => self.entries.insert(0, data),
        }
    }

    pub fn contains_destination(&self, name: &str) -> bool {
        let name = name.trim();
        !name.is_empty() && self.entries.iter().any(|entry| entry.destination() == Some(name))
    }

    /// Schema new generations should reuse so every document shares one shape.
    pub fn locked_schema(&self) -> Option<&Value> {
        self.entries.first().map(|entry| &entry.user_schema)
    }

    pub fn write_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(path, encoded)?;
        info!(path = %path.display(), tours = self.entries.len(), "collection exported");
        Ok(())
    }

    /// Writes `Tour_Export_<unix-millis>.json` into `dir`.
    pub fn export(&self, dir: &Path) -> AppResult<PathBuf> {
        let path = dir.join(export_file_name(Utc::now().timestamp_millis()));
        self.write_to(&path)?;
        Ok(path)
    }
}

pub fn export_file_name(millis: i64) -> String {
    format!("Tour_Export_{millis}.json")
}
