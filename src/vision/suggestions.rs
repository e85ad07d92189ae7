//! Gating of vision timer suggestions

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use super::analysis::TimerSuggestion;
use crate::timers::TimerEngine;

/// Why a suggestion did not become a timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Duration was zero, negative or not finite
    InvalidDuration,
    /// Label was blank
    EmptyLabel,
    /// An existing timer's label overlaps this one
    Overlapping,
    /// The same label was auto-created within the suppression window
    Suppressed,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDuration => write!(f, "invalid duration"),
            Self::EmptyLabel => write!(f, "empty label"),
            Self::Overlapping => write!(f, "overlaps an existing timer"),
            Self::Suppressed => write!(f, "recently auto-created"),
        }
    }
}

/// Outcome of evaluating a suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionDecision {
    Create { label: String, duration: NonZeroU32 },
    Rejected(Rejection),
}

/// Remembers auto-created labels and rejects duplicates within a window
#[derive(Debug)]
pub struct SuggestionFilter {
    window: Duration,
    recent: HashMap<String, Instant>,
}

impl SuggestionFilter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: HashMap::new(),
        }
    }

    /// Decide whether `suggestion` should create a timer at `now`
    ///
    /// An accepted suggestion is recorded, so the caller must create the timer.
    pub fn evaluate(
        &mut self,
        suggestion: &TimerSuggestion,
        timers: &TimerEngine,
        now: Instant,
    ) -> SuggestionDecision {
        let label = suggestion.label.trim();
        if label.is_empty() {
            return SuggestionDecision::Rejected(Rejection::EmptyLabel);
        }
        let Some(duration) = whole_seconds(suggestion.duration_seconds) else {
            return SuggestionDecision::Rejected(Rejection::InvalidDuration);
        };
        if timers.has_overlapping_label(label) {
            return SuggestionDecision::Rejected(Rejection::Overlapping);
        }

        self.recent
            .retain(|_, created| now.saturating_duration_since(*created) < self.window);
        let key = label.to_lowercase();
        if self.recent.contains_key(&key) {
            return SuggestionDecision::Rejected(Rejection::Suppressed);
        }

        self.recent.insert(key, now);
        SuggestionDecision::Create {
            label: label.to_string(),
            duration,
        }
    }

    /// Forget all remembered labels
    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_seconds(seconds: f64) -> Option<NonZeroU32> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let rounded = seconds.round().clamp(1.0, f64::from(u32::MAX));
    NonZeroU32::new(rounded as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(label: &str, seconds: f64) -> TimerSuggestion {
        TimerSuggestion {
            label: label.to_string(),
            duration_seconds: seconds,
            reason: None,
        }
    }

    #[test]
    fn rejects_non_positive_durations() {
        let mut filter = SuggestionFilter::new(Duration::from_secs(30));
        let timers = TimerEngine::new();
        let now = Instant::now();
        for seconds in [0.0, -5.0, f64::NAN] {
            assert_eq!(
                filter.evaluate(&suggestion("Rice", seconds), &timers, now),
                SuggestionDecision::Rejected(Rejection::InvalidDuration)
            );
        }
    }

    #[test]
    fn rejects_overlapping_labels_either_direction() {
        let mut filter = SuggestionFilter::new(Duration::from_secs(30));
        let mut timers = TimerEngine::new();
        timers.create("Boil pasta", NonZeroU32::new(600).unwrap());
        let now = Instant::now();

        assert_eq!(
            filter.evaluate(&suggestion("PASTA", 300.0), &timers, now),
            SuggestionDecision::Rejected(Rejection::Overlapping)
        );
        assert_eq!(
            filter.evaluate(&suggestion("Boil pasta water", 300.0), &timers, now),
            SuggestionDecision::Rejected(Rejection::Overlapping)
        );
    }

    #[test]
    fn suppression_expires_after_window() {
        let mut filter = SuggestionFilter::new(Duration::from_secs(30));
        let timers = TimerEngine::new();
        let start = Instant::now();

        assert!(matches!(
            filter.evaluate(&suggestion("Sauce", 120.0), &timers, start),
            SuggestionDecision::Create { .. }
        ));
        assert_eq!(
            filter.evaluate(&suggestion("sauce", 120.0), &timers, start + Duration::from_secs(10)),
            SuggestionDecision::Rejected(Rejection::Suppressed)
        );
        assert!(matches!(
            filter.evaluate(&suggestion("Sauce", 120.0), &timers, start + Duration::from_secs(31)),
            SuggestionDecision::Create { .. }
        ));
    }

    #[test]
    fn rounds_fractional_durations() {
        let mut filter = SuggestionFilter::new(Duration::from_secs(30));
        let timers = TimerEngine::new();
        let decision = filter.evaluate(&suggestion("Egg", 0.4), &timers, Instant::now());
        assert_eq!(
            decision,
            SuggestionDecision::Create {
                label: "Egg".to_string(),
                duration: NonZeroU32::new(1).unwrap()
            }
        );
    }
}
