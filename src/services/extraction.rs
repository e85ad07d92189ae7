//! Recipe extraction client

use serde::{Deserialize, Serialize};

use super::{read_body, truncate_chars, MAX_EXCERPT_CHARS};
use crate::recipe::Recipe;
use crate::{Error, Result};

/// Kind of content submitted for extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Url,
    Image,
    Text,
}

impl ContentKind {
    /// Guess the kind of a CLI argument: URLs, image paths, otherwise text
    #[must_use]
    pub fn infer(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Self::Url;
        }
        let lower = trimmed.to_lowercase();
        if [".jpg", ".jpeg", ".png", ".webp"]
            .iter()
            .any(|ext| lower.ends_with(ext))
        {
            return Self::Image;
        }
        Self::Text
    }
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: ContentKind,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    recipe: Option<Recipe>,
    error: Option<String>,
}

/// Calls the external recipe extraction service
pub struct RecipeExtractor {
    client: reqwest::Client,
    url: String,
}

impl RecipeExtractor {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Extract a recipe from a URL, base64 image or free text
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimit`/`Error::QuotaExceeded` verbatim from the
    /// service, `Error::Service` for explicit errors and `Error::Parse` for
    /// unparseable responses
    pub async fn extract(&self, content: &str, kind: ContentKind) -> Result<Recipe> {
        let response = self
            .client
            .post(&self.url)
            .json(&ExtractRequest { content, kind })
            .send()
            .await?;

        let body = read_body(response).await?;
        let parsed: ExtractResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Parse(format!(
                "{e}: {}",
                truncate_chars(&body, MAX_EXCERPT_CHARS)
            ))
        })?;

        if let Some(error) = parsed.error {
            return Err(Error::Service(error));
        }
        let recipe = parsed
            .recipe
            .ok_or_else(|| Error::Parse("response contained no recipe".to_string()))?;

        tracing::info!(title = %recipe.title, steps = recipe.instructions.len(), "recipe extracted");
        Ok(recipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_kind() {
        assert_eq!(ContentKind::infer("https://example.com/pie"), ContentKind::Url);
        assert_eq!(ContentKind::infer("card.JPG"), ContentKind::Image);
        assert_eq!(ContentKind::infer("2 eggs, whisk"), ContentKind::Text);
    }

    #[test]
    fn request_uses_type_field() {
        let json = serde_json::to_value(ExtractRequest {
            content: "x",
            kind: ContentKind::Url,
        })
        .unwrap();
        assert_eq!(json["type"], "url");
    }
}
