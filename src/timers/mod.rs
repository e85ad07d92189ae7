//! Countdown timers
//!
//! The engine owns every timer and is advanced by a strictly periodic tick
//! (once per second) that runs whether or not a live session is connected.

use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Period of the timer tick
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Timer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Running,
    Paused,
    Finished,
}

impl std::fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// A single countdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    /// Opaque unique identifier
    pub id: String,
    /// Free-text label
    pub label: String,
    /// Original duration in seconds (at least 1)
    pub duration_seconds: u32,
    /// Remaining seconds, never above `duration_seconds`
    pub remaining_seconds: u32,
    /// Current status
    pub status: TimerStatus,
}

impl Timer {
    /// Whether `label` overlaps this timer's label (case-insensitive substring either way)
    #[must_use]
    pub fn label_overlaps(&self, label: &str) -> bool {
        labels_overlap(&self.label, label)
    }
}

/// Case-insensitive substring match in either direction
#[must_use]
pub fn labels_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Owns and advances all timers
#[derive(Debug, Default)]
pub struct TimerEngine {
    timers: Vec<Timer>,
}

impl TimerEngine {
    /// Create an empty engine
    #[must_use]
    pub const fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Create a running timer and return a copy of it
    pub fn create(&mut self, label: impl Into<String>, duration: NonZeroU32) -> Timer {
        let label = label.into();
        let label = if label.trim().is_empty() {
            "Timer".to_string()
        } else {
            label.trim().to_string()
        };

        let timer = Timer {
            id: uuid::Uuid::new_v4().to_string(),
            label,
            duration_seconds: duration.get(),
            remaining_seconds: duration.get(),
            status: TimerStatus::Running,
        };

        tracing::debug!(id = %timer.id, label = %timer.label, seconds = timer.duration_seconds, "timer created");
        self.timers.push(timer.clone());
        timer
    }

    /// Advance every running timer by one second
    ///
    /// Returns the timers that finished on this tick.
    pub fn tick(&mut self) -> Vec<Timer> {
        let mut finished = Vec::new();

        for timer in self
            .timers
            .iter_mut()
            .filter(|t| t.status == TimerStatus::Running)
        {
            timer.remaining_seconds = timer.remaining_seconds.saturating_sub(1);
            if timer.remaining_seconds == 0 {
                timer.status = TimerStatus::Finished;
                tracing::info!(id = %timer.id, label = %timer.label, "timer finished");
                finished.push(timer.clone());
            }
        }

        finished
    }

    /// Pause a running timer
    ///
    /// Returns `false` if the timer does not exist or is not running.
    pub fn pause(&mut self, id: &str) -> bool {
        self.transition(id, TimerStatus::Running, TimerStatus::Paused)
    }

    /// Resume a paused timer
    ///
    /// Returns `false` if the timer does not exist or is not paused.
    pub fn resume(&mut self, id: &str) -> bool {
        self.transition(id, TimerStatus::Paused, TimerStatus::Running)
    }

    /// Restore the original duration and force the timer to run
    pub fn reset(&mut self, id: &str) -> bool {
        let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        timer.remaining_seconds = timer.duration_seconds;
        timer.status = TimerStatus::Running;
        true
    }

    /// Remove a timer
    pub fn delete(&mut self, id: &str) -> Option<Timer> {
        let index = self.timers.iter().position(|t| t.id == id)?;
        Some(self.timers.remove(index))
    }

    /// Look up a timer by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Timer> {
        self.timers.iter().find(|t| t.id == id)
    }

    /// All timers in creation order
    #[must_use]
    pub fn list(&self) -> &[Timer] {
        &self.timers
    }

    /// Whether any existing timer's label overlaps `label`
    #[must_use]
    pub fn has_overlapping_label(&self, label: &str) -> bool {
        self.timers.iter().any(|t| t.label_overlaps(label))
    }

    fn transition(&mut self, id: &str, from: TimerStatus, to: TimerStatus) -> bool {
        match self.timers.iter_mut().find(|t| t.id == id) {
            Some(timer) if timer.status == from => {
                timer.status = to;
                true
            }
            _ => false,
        }
    }
}

/// Format seconds as `m:ss` or `h:mm:ss`
#[must_use]
pub fn format_remaining(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
