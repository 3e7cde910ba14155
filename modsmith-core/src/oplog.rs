//! Append-only log of user-visible actions
//!
//! The assistant records what it did (generated, blocked, wrote) so the
//! consent prompt can show recent history. Each entry is mirrored to
//! `tracing` at info level.

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub action: String,
    pub details: String,
}

#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: impl Into<String>, details: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            action: action.into(),
            details: details.into(),
        };
        tracing::info!(action = %entry.action, details = %entry.details, "operation");
        self.entries.push(entry);
    }

    /// Last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
