//! Vision frame sampling
//!
//! Frames are relayed to the live channel on a sub-second cadence and, on a
//! slower cadence, sent to the still-image analysis service whose timer
//! suggestions are gated by [`SuggestionFilter`].

mod analysis;
mod frame;
mod suggestions;

pub use analysis::{AnalysisClient, FrameAnalysis, FrameAnalyzer, TimerSuggestion, parse_analysis};
pub use frame::{SnapshotFileSource, VideoSource, encode_jpeg};
pub use suggestions::{Rejection, SuggestionDecision, SuggestionFilter};

/// MIME type of relayed and analyzed frames
pub const JPEG_MIME_TYPE: &str = "image/jpeg";
