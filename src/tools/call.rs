//! Typed tool invocations decoded from remote argument bags

use std::num::NonZeroU32;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const CREATE_TIMER: &str = "createTimer";
pub const GET_TIMERS: &str = "getTimers";
pub const LOG_OBSERVATION: &str = "logObservation";
pub const GET_ACTIVE_RECIPE: &str = "getActiveRecipe";

/// Errors decoding a tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Arguments missing, mistyped or out of range
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl ToolError {
    fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CreateTimer { label: String, duration: NonZeroU32 },
    GetTimers,
    LogObservation { text: String },
    GetActiveRecipe,
    /// A name this client does not implement
    Unrecognized { name: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimerArgs {
    label: String,
    duration_seconds: Value,
}

#[derive(Deserialize)]
struct LogObservationArgs {
    text: String,
}

impl ToolCall {
    /// Decode and validate an invocation by name
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` when a known tool receives a
    /// malformed payload. Unknown names decode to `ToolCall::Unrecognized`.
    pub fn decode(name: &str, args: &Value) -> Result<Self, ToolError> {
        match name {
            CREATE_TIMER => {
                let parsed: CreateTimerArgs = serde_json::from_value(args.clone())
                    .map_err(|e| ToolError::invalid(name, e.to_string()))?;
                let duration = parse_duration(&parsed.duration_seconds)
                    .ok_or_else(|| ToolError::invalid(name, "durationSeconds must be a positive integer"))?;
                Ok(Self::CreateTimer {
                    label: parsed.label,
                    duration,
                })
            }
            GET_TIMERS => Ok(Self::GetTimers),
            LOG_OBSERVATION => {
                let parsed: LogObservationArgs = serde_json::from_value(args.clone())
                    .map_err(|e| ToolError::invalid(name, e.to_string()))?;
                if parsed.text.trim().is_empty() {
                    return Err(ToolError::invalid(name, "text must not be empty"));
                }
                Ok(Self::LogObservation { text: parsed.text })
            }
            GET_ACTIVE_RECIPE => Ok(Self::GetActiveRecipe),
            other => Ok(Self::Unrecognized {
                name: other.to_string(),
            }),
        }
    }
}

/// Accept integral JSON numbers (including `300.0`) and numeric strings
fn parse_duration(value: &Value) -> Option<NonZeroU32> {
    let seconds = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= 1.0 && *f <= f64::from(u32::MAX))
                .map(|f| {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let whole = f as u64;
                    whole
                })
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(seconds).ok().and_then(NonZeroU32::new)
}
