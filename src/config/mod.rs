//! Configuration management for the live session orchestrator

pub mod file;

use std::time::Duration;

use crate::{Error, Result};

use file::LiveConfigFile;

/// Default streaming endpoint (constrained variant, authorized by ephemeral tokens)
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Puck";

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Remote endpoints
    pub endpoints: EndpointsConfig,

    /// Live session settings
    pub session: SessionConfig,

    /// Vision cadences and compression
    pub vision: VisionConfig,

    /// Ring buffer sizes
    pub logs: LogConfig,

    /// Optional behaviors injected into the orchestrator
    pub behaviors: Behaviors,
}

/// Remote endpoint URLs
#[derive(Debug, Clone)]
pub struct EndpointsConfig {
    /// Capability token issuer
    pub token_url: String,

    /// Still-image analysis service
    pub analysis_url: String,

    /// Recipe extraction service
    pub extraction_url: String,

    /// Streaming channel (WebSocket)
    pub live_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            token_url: "http://localhost:3000/api/live-token".to_string(),
            analysis_url: "http://localhost:3000/api/analyze-frame".to_string(),
            extraction_url: "http://localhost:3000/api/extract-recipe".to_string(),
            live_url: DEFAULT_LIVE_URL.to_string(),
        }
    }
}

/// Live session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier sent in the setup message
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// How long to wait for the open acknowledgment
    pub connect_timeout: Duration,

    /// Selected camera device identifier
    pub camera_device: Option<String>,

    /// Prefer the wide-angle lens
    pub wide_angle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            connect_timeout: Duration::from_secs(15),
            camera_device: None,
            wide_angle: false,
        }
    }
}

/// Vision sampler settings
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Continuous relay period
    pub relay_interval: Duration,

    /// Longest edge of relayed frames
    pub relay_max_dimension: u32,

    /// JPEG quality for relayed frames (1-100)
    pub relay_quality: u8,

    /// Still analysis period
    pub analysis_interval: Duration,

    /// Longest edge of analyzed frames
    pub analysis_max_dimension: u32,

    /// JPEG quality for analyzed frames (1-100)
    pub analysis_quality: u8,

    /// Window during which an auto-created timer label is not created again
    pub suppression_window: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            relay_interval: Duration::from_millis(500),
            relay_max_dimension: 640,
            relay_quality: 60,
            analysis_interval: Duration::from_secs(10),
            analysis_max_dimension: 320,
            analysis_quality: 40,
            suppression_window: Duration::from_secs(30),
        }
    }
}

/// Ring buffer sizes
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum retained vision observations
    pub observation_capacity: usize,

    /// Maximum retained session log entries
    pub session_log_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            observation_capacity: 50,
            session_log_capacity: 200,
        }
    }
}

/// Optional behaviors
#[derive(Debug, Clone, Copy)]
pub struct Behaviors {
    /// Collect session counters
    pub diagnostics: bool,

    /// Create timers from vision suggestions
    pub proactive_timers: bool,

    /// Request and log speech transcripts
    pub transcripts: bool,
}

impl Default for Behaviors {
    fn default() -> Self {
        Self {
            diagnostics: false,
            proactive_timers: true,
            transcripts: false,
        }
    }
}

impl Config {
    /// Load configuration from defaults, the config file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_sources(fc: LiveConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let endpoints = EndpointsConfig {
            token_url: env("SOUS_TOKEN_URL")
                .or(fc.endpoints.token_url)
                .unwrap_or(defaults.endpoints.token_url),
            analysis_url: env("SOUS_ANALYSIS_URL")
                .or(fc.endpoints.analysis_url)
                .unwrap_or(defaults.endpoints.analysis_url),
            extraction_url: env("SOUS_EXTRACT_URL")
                .or(fc.endpoints.extraction_url)
                .unwrap_or(defaults.endpoints.extraction_url),
            live_url: env("SOUS_LIVE_URL")
                .or(fc.endpoints.live_url)
                .unwrap_or(defaults.endpoints.live_url),
        };

        let session = SessionConfig {
            model: env("SOUS_MODEL")
                .or(fc.session.model)
                .unwrap_or(defaults.session.model),
            voice: env("SOUS_VOICE")
                .or(fc.session.voice)
                .unwrap_or(defaults.session.voice),
            connect_timeout: env("SOUS_CONNECT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.session.connect_timeout_secs)
                .map_or(defaults.session.connect_timeout, Duration::from_secs),
            camera_device: env("SOUS_CAMERA_DEVICE").or(fc.session.camera_device),
            wide_angle: fc.session.wide_angle.unwrap_or(defaults.session.wide_angle),
        };

        let vision = VisionConfig {
            relay_interval: fc
                .vision
                .relay_interval_ms
                .map_or(defaults.vision.relay_interval, Duration::from_millis),
            relay_max_dimension: fc
                .vision
                .relay_max_dimension
                .unwrap_or(defaults.vision.relay_max_dimension),
            relay_quality: fc.vision.relay_quality.unwrap_or(defaults.vision.relay_quality),
            analysis_interval: fc
                .vision
                .analysis_interval_secs
                .map_or(defaults.vision.analysis_interval, Duration::from_secs),
            analysis_max_dimension: fc
                .vision
                .analysis_max_dimension
                .unwrap_or(defaults.vision.analysis_max_dimension),
            analysis_quality: fc
                .vision
                .analysis_quality
                .unwrap_or(defaults.vision.analysis_quality),
            suppression_window: fc
                .vision
                .suppression_window_secs
                .map_or(defaults.vision.suppression_window, Duration::from_secs),
        };

        let logs = LogConfig {
            observation_capacity: fc
                .logs
                .observation_capacity
                .unwrap_or(defaults.logs.observation_capacity),
            session_log_capacity: fc
                .logs
                .session_log_capacity
                .unwrap_or(defaults.logs.session_log_capacity),
        };

        let behaviors = Behaviors {
            diagnostics: env_flag(&env, "SOUS_DIAGNOSTICS")
                .or(fc.behaviors.diagnostics)
                .unwrap_or(defaults.behaviors.diagnostics),
            proactive_timers: env_flag(&env, "SOUS_PROACTIVE_TIMERS")
                .or(fc.behaviors.proactive_timers)
                .unwrap_or(defaults.behaviors.proactive_timers),
            transcripts: env_flag(&env, "SOUS_TRANSCRIPTS")
                .or(fc.behaviors.transcripts)
                .unwrap_or(defaults.behaviors.transcripts),
        };

        let config = Self {
            endpoints,
            session,
            vision,
            logs,
            behaviors,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the orchestrator relies on
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        if self.vision.relay_interval.is_zero() || self.vision.analysis_interval.is_zero() {
            return Err(Error::Config("vision intervals must be non-zero".to_string()));
        }
        for quality in [self.vision.relay_quality, self.vision.analysis_quality] {
            if !(1..=100).contains(&quality) {
                return Err(Error::Config(format!(
                    "JPEG quality must be within 1-100, got {quality}"
                )));
            }
        }
        if self.vision.relay_max_dimension == 0 || self.vision.analysis_max_dimension == 0 {
            return Err(Error::Config("frame dimensions must be non-zero".to_string()));
        }
        if self.logs.observation_capacity == 0 || self.logs.session_log_capacity == 0 {
            return Err(Error::Config("log capacities must be non-zero".to_string()));
        }
        if !self.endpoints.live_url.starts_with("ws://") && !self.endpoints.live_url.starts_with("wss://") {
            return Err(Error::Config(format!(
                "live url must be a ws:// or wss:// url: {}",
                self.endpoints.live_url
            )));
        }
        Ok(())
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_sources(LiveConfigFile::default(), no_env).unwrap();
        assert_eq!(config.session.voice, DEFAULT_VOICE);
        assert_eq!(config.vision.relay_interval, Duration::from_millis(500));
        assert!(config.behaviors.proactive_timers);
        assert!(!config.behaviors.diagnostics);
    }

    #[test]
    fn env_overrides_file() {
        let fc: LiveConfigFile = toml::from_str(
            r#"
            [session]
            voice = "Kore"
            model = "models/from-file"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(fc, |key| match key {
            "SOUS_VOICE" => Some("Charon".to_string()),
            "SOUS_DIAGNOSTICS" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.session.voice, "Charon");
        assert_eq!(config.session.model, "models/from-file");
        assert!(config.behaviors.diagnostics);
    }

    #[test]
    fn rejects_bad_quality() {
        let fc: LiveConfigFile = toml::from_str("[vision]\nrelay_quality = 0\n").unwrap();
        let err = Config::from_sources(fc, no_env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_http_live_url() {
        let err = Config::from_sources(LiveConfigFile::default(), |key| {
            (key == "SOUS_LIVE_URL").then(|| "https://example.com".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }
}
