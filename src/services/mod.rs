//! Clients for the external request/response collaborators
//!
//! Token issuance and recipe extraction live here; still-image analysis
//! lives with the vision sampler. All share the same status mapping.

mod extraction;
mod token;

pub use extraction::{ContentKind, RecipeExtractor};
pub use token::{CapabilityToken, HttpTokenProvider, TokenCache, TokenProvider};

use serde::Deserialize;

use crate::{Error, Result};

/// Longest raw body excerpt carried in error messages and fallbacks
pub const MAX_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map a non-success HTTP status and body to an error, passing messages through verbatim
#[must_use]
pub fn status_error(status: reqwest::StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| truncate_chars(body.trim(), MAX_EXCERPT_CHARS));
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match status.as_u16() {
        429 if message.to_lowercase().contains("quota") => Error::QuotaExceeded(message),
        429 => Error::RateLimit(message),
        402 => Error::QuotaExceeded(message),
        _ => Error::Service(format!("{status}: {message}")),
    }
}

/// Read a response body, mapping non-success statuses through [`status_error`]
///
/// # Errors
///
/// Returns the mapped error for non-success responses, or `Error::Http` if the body cannot be read
pub async fn read_body(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(status_error(status, &body))
    }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
