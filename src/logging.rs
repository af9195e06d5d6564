//! Deterministic execution logging
//!
//! Log entries carry timestamps from the deterministic clock, never the wall
//! clock, so logging is side-effect free with respect to reproducibility.
//! The log is in-memory and thread safe; draining it is the caller's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::Version;

/// Log level for deterministic logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A deterministic log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Timestamp from the deterministic clock
    pub timestamp: DateTime<Utc>,
    pub trace_id: Option<Uuid>,
    pub function_id: Option<String>,
    pub version: Option<Version>,
    pub message: String,
    pub metadata: Vec<(String, String)>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(level: LogLevel, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp,
            trace_id: None,
            function_id: None,
            version: None,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    /// Attach the trace this entry belongs to
    pub fn with_trace(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Attach function context
    pub fn with_function(mut self, function_id: impl Into<String>, version: Version) -> Self {
        self.function_id = Some(function_id.into());
        self.version = Some(version);
        self
    }

    /// Attach a metadata pair
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Thread-safe, in-memory execution log with level filtering
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<LogEntry>>,
    min_level: LogLevel,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl ExecutionLog {
    /// Create a log recording entries at or above `min_level`
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_level,
        }
    }

    /// Capture everything
    pub fn all() -> Self {
        Self::new(LogLevel::Trace)
    }

    /// Capture info and above
    pub fn with_info_level() -> Self {
        Self::new(LogLevel::Info)
    }

    /// Record an entry if it meets the minimum level
    pub fn record(&self, entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// All recorded entries
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries recorded for a specific trace
    pub fn entries_for_trace(&self, trace_id: &Uuid) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.trace_id.as_ref() == Some(trace_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
