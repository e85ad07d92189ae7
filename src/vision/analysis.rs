//! Still-image analysis client
//!
//! Posts a small, heavily compressed frame plus the active recipe to the
//! description service and returns a free-text description with an optional
//! timer suggestion.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::recipe::ActiveRecipeContext;
use crate::services::{read_body, truncate_chars, MAX_EXCERPT_CHARS};
use crate::{Error, Result};

/// A timer proposed by the analysis service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSuggestion {
    pub label: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of analyzing one still frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub description: String,
    pub timer_suggestion: Option<TimerSuggestion>,
    /// The response could not be parsed and `description` is raw text
    pub degraded: bool,
}

/// Describes still frames
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    /// Analyze a JPEG frame in the context of the active recipe
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimit`/`Error::QuotaExceeded` verbatim, or
    /// `Error::Service`/`Error::Http` for other failures
    async fn analyze(
        &self,
        jpeg: Vec<u8>,
        recipe: Option<ActiveRecipeContext>,
    ) -> Result<FrameAnalysis>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_recipe: Option<ActiveRecipeContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    description: Option<String>,
    timer_suggestion: Option<Value>,
    error: Option<String>,
}

/// HTTP client for the description service
pub struct AnalysisClient {
    client: reqwest::Client,
    url: String,
}

impl AnalysisClient {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl FrameAnalyzer for AnalysisClient {
    async fn analyze(
        &self,
        jpeg: Vec<u8>,
        recipe: Option<ActiveRecipeContext>,
    ) -> Result<FrameAnalysis> {
        let request = AnalysisRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
            active_recipe: recipe,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let body = read_body(response).await?;
        parse_analysis(&body)
    }
}

/// Interpret a description service body, falling back to truncated raw text
///
/// # Errors
///
/// Returns `Error::Service` when the body carries an explicit error
pub fn parse_analysis(body: &str) -> Result<FrameAnalysis> {
    match serde_json::from_str::<AnalysisResponse>(body) {
        Ok(AnalysisResponse {
            error: Some(error), ..
        }) => Err(Error::Service(error)),
        Ok(AnalysisResponse {
            description: Some(description),
            timer_suggestion,
            ..
        }) => Ok(FrameAnalysis {
            description,
            timer_suggestion: timer_suggestion.and_then(|value| {
                let suggestion = parse_suggestion(&value);
                if suggestion.is_none() {
                    tracing::debug!(%value, "malformed timer suggestion ignored");
                }
                suggestion
            }),
            degraded: false,
        }),
        Ok(_) | Err(_) => {
            tracing::debug!("analysis response not understood, using raw text");
            Ok(FrameAnalysis {
                description: truncate_chars(body.trim(), MAX_EXCERPT_CHARS),
                timer_suggestion: None,
                degraded: true,
            })
        }
    }
}

/// Read a suggestion leniently: the duration may be a number or a numeric string
fn parse_suggestion(value: &Value) -> Option<TimerSuggestion> {
    let label = value.get("label")?.as_str()?.to_string();
    let duration_seconds = match value.get("durationSeconds")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(TimerSuggestion {
        label,
        duration_seconds,
        reason,
    })
}
