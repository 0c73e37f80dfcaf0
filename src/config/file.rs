//! TOML configuration file loading
//!
//! Supports `~/.config/newscast/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NewscastConfigFile {
    /// Gemini API key (environment variables take precedence)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Live conversation configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// One-shot text, search and TTS configuration
    #[serde(default)]
    pub genai: GenAiFileConfig,
}

/// Live conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint of the live voice API
    pub endpoint: Option<String>,

    /// Live model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// System prompt for the conversation
    pub system_prompt: Option<String>,

    /// Request transcription of the user's speech
    pub input_transcription: Option<bool>,

    /// Request transcription of the model's speech
    pub output_transcription: Option<bool>,

    /// Samples per captured frame
    pub frame_size: Option<usize>,

    /// Seconds to wait for the remote to acknowledge setup (0 disables)
    pub connect_timeout_secs: Option<u64>,

    /// Consecutive undecodable fragments tolerated (0 disables)
    pub max_consecutive_decode_failures: Option<u32>,
}

/// One-shot generative API configuration
#[derive(Debug, Default, Deserialize)]
pub struct GenAiFileConfig {
    /// REST base URL
    pub base_url: Option<String>,
    pub news_model: Option<String>,
    pub chat_model: Option<String>,
    pub analysis_model: Option<String>,
    pub tts_model: Option<String>,
    /// Thinking budget for deep analysis
    pub thinking_budget: Option<u32>,
    /// Podcast hosts and their voices
    pub hosts: Option<Vec<HostFileConfig>>,
}

/// One podcast host
#[derive(Debug, Deserialize)]
pub struct HostFileConfig {
    pub name: String,
    pub voice: String,
}

/// Load the TOML config file from the standard path
///
/// Returns `NewscastConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NewscastConfigFile {
    let Some(path) = config_file_path() else {
        return NewscastConfigFile::default();
    };

    if !path.exists() {
        return NewscastConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                NewscastConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NewscastConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/newscast/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("newscast").join("config.toml"))
}
