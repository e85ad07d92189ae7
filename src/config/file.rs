//! TOML configuration file loading
//!
//! Supports `~/.config/sous/live/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveConfigFile {
    /// Remote endpoints
    #[serde(default)]
    pub endpoints: EndpointsFileConfig,

    /// Live session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Vision sampling configuration
    #[serde(default)]
    pub vision: VisionFileConfig,

    /// Log buffer sizes
    #[serde(default)]
    pub logs: LogsFileConfig,

    /// Optional orchestrator behaviors
    #[serde(default)]
    pub behaviors: BehaviorsFileConfig,
}

/// Endpoint URLs
#[derive(Debug, Default, Deserialize)]
pub struct EndpointsFileConfig {
    pub token_url: Option<String>,
    pub analysis_url: Option<String>,
    pub extraction_url: Option<String>,
    pub live_url: Option<String>,
}

/// Live session settings
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Model identifier (e.g. "models/gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Puck")
    pub voice: Option<String>,

    /// Seconds to wait for the open acknowledgment
    pub connect_timeout_secs: Option<u64>,

    /// Camera device identifier
    pub camera_device: Option<String>,

    /// Prefer the wide-angle lens when available
    pub wide_angle: Option<bool>,
}

/// Vision cadences and compression
#[derive(Debug, Default, Deserialize)]
pub struct VisionFileConfig {
    pub relay_interval_ms: Option<u64>,
    pub relay_max_dimension: Option<u32>,
    pub relay_quality: Option<u8>,
    pub analysis_interval_secs: Option<u64>,
    pub analysis_max_dimension: Option<u32>,
    pub analysis_quality: Option<u8>,
    pub suppression_window_secs: Option<u64>,
}

/// Ring buffer sizes
#[derive(Debug, Default, Deserialize)]
pub struct LogsFileConfig {
    pub observation_capacity: Option<usize>,
    pub session_log_capacity: Option<usize>,
}

/// Behavior toggles
#[derive(Debug, Default, Deserialize)]
pub struct BehaviorsFileConfig {
    pub diagnostics: Option<bool>,
    pub proactive_timers: Option<bool>,
    pub transcripts: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveConfigFile {
    config_file_path().map_or_else(LiveConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_config_from(path: &Path) -> LiveConfigFile {
    if !path.exists() {
        return LiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/sous/live/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sous").join("live").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let parsed: LiveConfigFile = toml::from_str(
            r#"
            [session]
            voice = "Kore"

            [vision]
            relay_interval_ms = 750

            [behaviors]
            diagnostics = true
            "#,
        )
        .unwrap();

        assert_eq!(parsed.session.voice.as_deref(), Some("Kore"));
        assert_eq!(parsed.vision.relay_interval_ms, Some(750));
        assert_eq!(parsed.behaviors.diagnostics, Some(true));
        assert!(parsed.endpoints.token_url.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let parsed = load_config_from(Path::new("/definitely/not/here/config.toml"));
        assert!(parsed.session.model.is_none());
    }
}
