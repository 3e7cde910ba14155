//! # Record storage
//!
//! Where [`InteractionRecord`]s live. The file store keeps one pretty JSON
//! document per record, named after the record id, so the memory directory
//! stays readable and diffable.

use crate::error::{io_failed, Error, Result};
use crate::memory::InteractionRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Record ids are hex digests; anything else never names a file
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Persistence for interaction records
pub trait RecordStore: Send + Sync {
    fn load(&self, id: &str) -> Option<InteractionRecord>;
    fn save(&mut self, record: &InteractionRecord) -> Result<()>;
    fn remove(&mut self, id: &str) -> Result<()>;
    /// Every stored id, readable or not, sorted
    fn ids(&self) -> Vec<String>;
    fn clear(&mut self) -> Result<()>;

    /// Readable records, oldest first
    fn records(&self) -> Vec<InteractionRecord> {
        let mut records: Vec<InteractionRecord> = self.ids().iter().filter_map(|id| self.load(id)).collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records
    }
}

fn check_id(id: &str, operation: &'static str) -> Result<()> {
    if is_valid_id(id) {
        return Ok(());
    }
    Err(Error::invalid_argument("record id must be alphanumeric")
        .with_operation(operation)
        .with_context("id", id.to_string()))
}

/// Records held for the life of the process
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecords {
    records: HashMap<String, InteractionRecord>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecords {
    fn load(&self, id: &str) -> Option<InteractionRecord> {
        self.records.get(id).cloned()
    }

    fn save(&mut self, record: &InteractionRecord) -> Result<()> {
        check_id(&record.id, "storage::save")?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

/// `<dir>/<id>.json` per record
#[derive(Debug, Clone)]
pub struct JsonRecordDir {
    dir: PathBuf,
}

impl JsonRecordDir {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| io_failed("storage::open", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl RecordStore for JsonRecordDir {
    fn load(&self, id: &str) -> Option<InteractionRecord> {
        if !is_valid_id(id) {
            return None;
        }
        let path = self.record_path(id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                None
            }
        }
    }

    fn save(&mut self, record: &InteractionRecord) -> Result<()> {
        check_id(&record.id, "storage::save")?;
        let path = self.record_path(&record.id);
        let content = serde_json::to_string_pretty(record).map_err(|e| {
            Error::serialization_failed(e.to_string())
                .with_operation("storage::save")
                .with_context("id", record.id.clone())
        })?;
        std::fs::write(&path, content).map_err(|e| io_failed("storage::save", &path, e))
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        check_id(id, "storage::remove")?;
        let path = self.record_path(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| io_failed("storage::remove", &path, e))?;
        }
        Ok(())
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                    .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                    .filter(|id| is_valid_id(id))
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn clear(&mut self) -> Result<()> {
        for id in self.ids() {
            self.remove(&id)?;
        }
        Ok(())
    }
}
