//! # Interaction memory
//!
//! Every handled request is stored as an [`InteractionRecord`] keyed by a
//! short hash of the request text, so asking the same thing twice replaces
//! the earlier record. The store is capped at `max_entries`; the oldest
//! records are evicted first.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::storage::{InMemoryRecords, JsonRecordDir, RecordStore};
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub input: String,
    pub generated_code: String,
    pub feedback: Option<String>,
    pub session: String,
}

/// First 12 hex chars of SHA-256 over the request text
pub fn memory_id(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_LEN);
    id
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryOptions {
    pub max_entries: usize,
    pub enable_learning: bool,
    pub enable_feedback: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            enable_learning: true,
            enable_feedback: true,
        }
    }
}

impl MemoryOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_entries: settings.main.max_memory_entries,
            enable_learning: settings.learning.ai_learning.enable_learning,
            enable_feedback: settings.learning.feedback_system.enable_user_feedback,
        }
    }
}

pub struct MemoryManager {
    storage: Box<dyn RecordStore>,
    options: MemoryOptions,
    session: String,
}

impl MemoryManager {
    pub fn new(storage: impl RecordStore + 'static, options: MemoryOptions) -> Self {
        let session = Local::now().format("%Y%m%d_%H%M%S").to_string();
        tracing::debug!(session = %session, max_entries = options.max_entries, "memory initialized");
        Self {
            storage: Box::new(storage),
            options,
            session,
        }
    }

    /// File-backed memory under `dir`, one JSON file per record
    pub fn open(dir: impl AsRef<Path>, options: MemoryOptions) -> Result<Self> {
        let storage = JsonRecordDir::open(dir.as_ref())?;
        tracing::info!(dir = %dir.as_ref().display(), "memory store opened");
        Ok(Self::new(storage, options))
    }

    pub fn in_memory(options: MemoryOptions) -> Self {
        Self::new(InMemoryRecords::new(), options)
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn options(&self) -> MemoryOptions {
        self.options
    }

    /// Record one interaction. Returns the record id, or None when learning is off.
    pub fn store_interaction(
        &mut self,
        input: &str,
        generated_code: &str,
        feedback: Option<&str>,
    ) -> Result<Option<String>> {
        if !self.options.enable_learning {
            tracing::debug!("learning disabled, interaction not stored");
            return Ok(None);
        }

        let record = InteractionRecord {
            id: memory_id(input),
            timestamp: Local::now().fixed_offset(),
            input: input.to_string(),
            generated_code: generated_code.to_string(),
            feedback: feedback
                .filter(|_| self.options.enable_feedback)
                .map(str::to_string),
            session: self.session.clone(),
        };

        let id = record.id.clone();
        self.put(&record)?;
        self.evict()?;

        tracing::debug!(id = %id, "interaction stored");
        Ok(Some(id))
    }

    pub fn get(&self, id: &str) -> Option<InteractionRecord> {
        self.storage.load(id)
    }

    /// Newest first
    pub fn recent(&self, n: usize) -> Vec<InteractionRecord> {
        let mut records = self.storage.records();
        records.reverse();
        records.truncate(n);
        records
    }

    pub fn len(&self) -> usize {
        self.storage.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_feedback(&mut self, id: &str, feedback: &str) -> Result<()> {
        if !self.options.enable_feedback {
            return Err(Error::unsupported("user feedback is disabled")
                .with_operation("memory::record_feedback"));
        }

        let mut record = self
            .get(id)
            .ok_or_else(|| Error::storage_not_found(id).with_operation("memory::record_feedback"))?;
        record.feedback = Some(feedback.to_string());
        self.put(&record)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.storage.clear()?;
        tracing::info!("memory cleared");
        Ok(())
    }

    fn put(&mut self, record: &InteractionRecord) -> Result<()> {
        self.storage.save(record)
    }

    fn evict(&mut self) -> Result<()> {
        if self.storage.ids().len() <= self.options.max_entries {
            return Ok(());
        }

        let records = self.storage.records();
        let excess = records.len().saturating_sub(self.options.max_entries);
        for record in records.iter().take(excess) {
            self.storage.remove(&record.id)?;
        }

        // Unparseable leftovers still count against the cap
        let remaining = self.storage.ids();
        if remaining.len() > self.options.max_entries {
            let valid: std::collections::HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            for key in remaining.iter().filter(|k| !valid.contains(k.as_str())) {
                self.storage.remove(key)?;
            }
        }

        tracing::debug!(evicted = excess, "memory evicted oldest records");
        Ok(())
    }
}
