//! Bounded in-memory logs: vision observations and the session log stream

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single vision observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl VisionLogEntry {
    #[must_use]
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
        }
    }
}

/// Severity of a session log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A user-visible session log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Append-only ring buffer; the oldest entry is evicted once full
#[derive(Debug, Clone)]
pub struct RingLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RingLog<T> {
    /// Create a ring holding at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if full
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Most recent entry
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Ring of vision observations
pub type VisionLog = RingLog<VisionLogEntry>;

/// Ring of session log entries
pub type SessionLog = RingLog<LogEntry>;
