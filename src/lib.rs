//! Sous Live - live cooking assistant session orchestrator
//!
//! This library drives a duplex audio/video session with a remote
//! conversational engine while a cook works at the stove:
//! - Microphone capture and gapless playback with barge-in
//! - Camera frame relay and periodic still analysis
//! - Remote tool calls routed to timers, the active recipe and an observation log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 CLI / application                    │
//! │   commands  │  recipe context  │  session events    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  LiveSession                         │
//! │  capture │ playback │ vision │ tools │ timers       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │       Live endpoint (WebSocket)  +  HTTP services    │
//! │   audio/video  │  tool calls  │  token, analysis    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod journal;
pub mod live;
pub mod recipe;
pub mod services;
pub mod timers;
pub mod tools;
pub mod vision;
pub mod voice;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use journal::{LogEntry, LogLevel, SessionLog, VisionLog, VisionLogEntry};
pub use live::{
    ConnectionState, LiveSession, SessionCommand, SessionDeps, SessionEvent, SessionHandle,
};
pub use recipe::{ActiveRecipeContext, Recipe, RecipeContext};
pub use services::{ContentKind, RecipeExtractor, TokenCache, TokenProvider};
pub use timers::{Timer, TimerEngine, TimerStatus};
pub use tools::{ToolCall, ToolDispatcher, ToolInvocation, ToolResult};
