//! Capability token acquisition
//!
//! Tokens are short-lived and may allow more than one connection. A cached
//! token is reused while it is unexpired and has uses left; an
//! authentication failure invalidates it for good.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{read_body, truncate_chars, MAX_EXCERPT_CHARS};
use crate::{Error, Result};

/// Opaque, time- and use-limited credential for opening the live channel
pub struct CapabilityToken {
    value: SecretString,
    /// Server-enforced expiry, when the issuer reports one
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining connection uses, when the issuer reports them
    pub uses_remaining: Option<u32>,
}

impl CapabilityToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: None,
            uses_remaining: None,
        }
    }

    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub const fn with_uses(mut self, uses: u32) -> Self {
        self.uses_remaining = Some(uses);
        self
    }

    /// The raw token, for building the channel request
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the token can still open a channel at `now`
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now) && self.uses_remaining != Some(0)
    }
}

impl Clone for CapabilityToken {
    fn clone(&self) -> Self {
        Self {
            value: SecretString::from(self.value.expose_secret().to_string()),
            expires_at: self.expires_at,
            uses_remaining: self.uses_remaining,
        }
    }
}

impl std::fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityToken")
            .field("value", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("uses_remaining", &self.uses_remaining)
            .finish()
    }
}

/// Issues capability tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh token
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if issuance fails
    async fn fetch(&self) -> Result<CapabilityToken>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    error: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    uses: Option<u32>,
}

/// Fetches tokens from the token endpoint over HTTP
pub struct HttpTokenProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenProvider {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch(&self) -> Result<CapabilityToken> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;

        let body = read_body(response)
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|_| {
            Error::Auth(format!(
                "unexpected token response: {}",
                truncate_chars(&body, MAX_EXCERPT_CHARS)
            ))
        })?;

        if let Some(error) = parsed.error {
            return Err(Error::Auth(error));
        }
        let value = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("token endpoint returned no token".to_string()))?;

        let mut token = CapabilityToken::new(value);
        token.expires_at = parsed.expires_at;
        token.uses_remaining = parsed.uses;

        tracing::debug!(expires_at = ?token.expires_at, uses = ?token.uses_remaining, "capability token issued");
        Ok(token)
    }
}

/// Reuses a token across connects until it expires, runs out of uses or fails auth
///
/// Clones share one cached token, so an acquire can run detached from its owner.
#[derive(Clone)]
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    cached: Arc<Mutex<Option<CapabilityToken>>>,
}

impl TokenCache {
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Return a usable token, consuming one use
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if a fresh token is needed and issuance fails
    pub async fn acquire(&self) -> Result<CapabilityToken> {
        if let Some(token) = self.consume(None)? {
            return Ok(token);
        }
        let fresh = self.provider.fetch().await?;
        self.consume(Some(fresh))?
            .ok_or_else(|| Error::Auth("no token available".to_string()))
    }

    /// Take one use of the cached token, after replacing it with `fresh` if given
    fn consume(&self, fresh: Option<CapabilityToken>) -> Result<Option<CapabilityToken>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| Error::Auth("token cache poisoned".to_string()))?;

        let now = Utc::now();
        let token = match fresh {
            Some(fresh) => cached.insert(fresh),
            None => match cached.as_mut() {
                Some(token) if token.is_usable(now) => token,
                _ => return Ok(None),
            },
        };
        if let Some(uses) = token.uses_remaining.as_mut() {
            *uses = uses.saturating_sub(1);
        }
        Ok(Some(token.clone()))
    }

    /// Forget the cached token after an authentication failure
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            if cached.take().is_some() {
                tracing::info!("capability token invalidated");
            }
        }
    }

    /// Whether a token is cached
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.cached.lock().is_ok_and(|cached| cached.is_some())
    }
}
