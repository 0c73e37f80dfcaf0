//! Configuration management for NewsCast
//!
//! Values are layered: built-in defaults, then the optional TOML file
//! (see [`file`]), then environment variables. CLI flags are applied on
//! top by the binary.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::NewscastConfigFile;

/// Default live voice API endpoint
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default REST base URL for one-shot requests
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default live model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default samples per captured frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

const DEFAULT_LIVE_VOICE: &str = "Kore";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_DECODE_FAILURES: u32 = 16;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly AI news assistant with a Nigerian persona. \
Your very first response in this conversation MUST be a warm and friendly greeting, such as \
'Hello! Welcome to Naija NewsCast. How can I help you with today's news?'. After the initial \
greeting, continue the conversation by answering the user's questions.";

/// NewsCast configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (`GEMINI_API_KEY`, falling back to `API_KEY`)
    pub api_key: Option<SecretString>,

    /// Live conversation configuration
    pub live: LiveConfig,

    /// One-shot generative API configuration
    pub genai: GenAiConfig,
}

/// Live conversation configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live voice API
    pub endpoint: String,

    /// Live model identifier
    pub model: String,

    /// Prebuilt voice used for spoken replies
    pub voice: String,

    /// System prompt sent with the session setup
    pub system_prompt: String,

    /// Request transcription of the user's speech
    pub input_transcription: bool,

    /// Request transcription of the model's speech
    pub output_transcription: bool,

    /// Samples per captured frame (16kHz mono)
    pub frame_size: usize,

    /// Upper bound on the `Connecting` phase; `None` waits indefinitely
    pub connect_timeout: Option<Duration>,

    /// Consecutive undecodable fragments before the session is torn down;
    /// 0 tolerates any number
    pub max_consecutive_decode_failures: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: DEFAULT_LIVE_VOICE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            input_transcription: true,
            output_transcription: true,
            frame_size: DEFAULT_FRAME_SIZE,
            connect_timeout: Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            max_consecutive_decode_failures: DEFAULT_MAX_DECODE_FAILURES,
        }
    }
}

/// One podcast host and the prebuilt voice that reads their lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodcastHost {
    pub name: String,
    pub voice: String,
}

/// One-shot generative API configuration
#[derive(Debug, Clone)]
pub struct GenAiConfig {
    /// REST base URL
    pub base_url: String,

    /// Model for the grounded news summary
    pub news_model: String,

    /// Low-latency model for quick chat
    pub chat_model: String,

    /// Model for deep analysis
    pub analysis_model: String,

    /// Multi-speaker TTS model
    pub tts_model: String,

    /// Thinking budget for deep analysis
    pub thinking_budget: u32,

    /// Podcast hosts, in speaking order
    pub hosts: Vec<PodcastHost>,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            news_model: "gemini-2.5-flash".to_string(),
            chat_model: "gemini-flash-lite-latest".to_string(),
            analysis_model: "gemini-2.5-pro".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            thinking_budget: 32768,
            hosts: vec![
                PodcastHost {
                    name: "Bayo".to_string(),
                    voice: "Puck".to_string(),
                },
                PodcastHost {
                    name: "Chioma".to_string(),
                    voice: "Kore".to_string(),
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources(
        fc: NewscastConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let defaults = LiveConfig::default();
        let fl = fc.live;

        let frame_size = match env("NEWSCAST_FRAME_SIZE") {
            Some(v) => parse_env("NEWSCAST_FRAME_SIZE", &v)?,
            None => fl.frame_size.unwrap_or(defaults.frame_size),
        };
        if frame_size == 0 {
            return Err(Error::Config("frame size must be greater than zero".to_string()));
        }

        let connect_timeout_secs = match env("NEWSCAST_CONNECT_TIMEOUT_SECS") {
            Some(v) => parse_env("NEWSCAST_CONNECT_TIMEOUT_SECS", &v)?,
            None => fl
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let max_consecutive_decode_failures = match env("NEWSCAST_MAX_DECODE_FAILURES") {
            Some(v) => parse_env("NEWSCAST_MAX_DECODE_FAILURES", &v)?,
            None => fl
                .max_consecutive_decode_failures
                .unwrap_or(defaults.max_consecutive_decode_failures),
        };

        let live = LiveConfig {
            endpoint: env("NEWSCAST_LIVE_URL")
                .or(fl.endpoint)
                .unwrap_or(defaults.endpoint),
            model: env("NEWSCAST_LIVE_MODEL")
                .or(fl.model)
                .unwrap_or(defaults.model),
            voice: env("NEWSCAST_LIVE_VOICE")
                .or(fl.voice)
                .unwrap_or(defaults.voice),
            system_prompt: env("NEWSCAST_SYSTEM_PROMPT")
                .or(fl.system_prompt)
                .unwrap_or(defaults.system_prompt),
            input_transcription: fl
                .input_transcription
                .unwrap_or(defaults.input_transcription),
            output_transcription: fl
                .output_transcription
                .unwrap_or(defaults.output_transcription),
            frame_size,
            connect_timeout: (connect_timeout_secs > 0)
                .then(|| Duration::from_secs(connect_timeout_secs)),
            max_consecutive_decode_failures,
        };

        let gd = GenAiConfig::default();
        let fg = fc.genai;
        let genai = GenAiConfig {
            base_url: env("NEWSCAST_API_URL")
                .or(fg.base_url)
                .unwrap_or(gd.base_url),
            news_model: env("NEWSCAST_NEWS_MODEL")
                .or(fg.news_model)
                .unwrap_or(gd.news_model),
            chat_model: env("NEWSCAST_CHAT_MODEL")
                .or(fg.chat_model)
                .unwrap_or(gd.chat_model),
            analysis_model: env("NEWSCAST_ANALYSIS_MODEL")
                .or(fg.analysis_model)
                .unwrap_or(gd.analysis_model),
            tts_model: env("NEWSCAST_TTS_MODEL")
                .or(fg.tts_model)
                .unwrap_or(gd.tts_model),
            thinking_budget: fg.thinking_budget.unwrap_or(gd.thinking_budget),
            hosts: fg.hosts.map_or(gd.hosts, |hosts| {
                hosts
                    .into_iter()
                    .map(|h| PodcastHost {
                        name: h.name,
                        voice: h.voice,
                    })
                    .collect()
            }),
        };

        Ok(Self {
            api_key,
            live,
            genai,
        })
    }

    /// Return the API key, or a configuration error if none is set
    ///
    /// # Errors
    ///
    /// Returns error if no API key was configured
    pub fn require_api_key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| {
            Error::Config("API key not set (export GEMINI_API_KEY or API_KEY)".to_string())
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = Config::from_sources(NewscastConfigFile::default(), env_from(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.live.frame_size, 4096);
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.live.connect_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.genai.hosts.len(), 2);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_gemini_key_preferred_over_api_key() {
        let config = Config::from_sources(
            NewscastConfigFile::default(),
            env_from(&[("API_KEY", "fallback"), ("GEMINI_API_KEY", "primary")]),
        )
        .unwrap();
        assert_eq!(config.require_api_key().unwrap().expose_secret(), "primary");
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: NewscastConfigFile = toml::from_str(
            r#"
            api_key = "from-file"
            [live]
            voice = "Puck"
            model = "file-model"
            "#,
        )
        .unwrap();
        let config =
            Config::from_sources(fc, env_from(&[("NEWSCAST_LIVE_VOICE", "Charon")])).unwrap();
        assert_eq!(config.live.voice, "Charon");
        assert_eq!(config.live.model, "file-model");
        assert_eq!(config.require_api_key().unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = Config::from_sources(
            NewscastConfigFile::default(),
            env_from(&[("NEWSCAST_CONNECT_TIMEOUT_SECS", "0")]),
        )
        .unwrap();
        assert!(config.live.connect_timeout.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_sources(
            NewscastConfigFile::default(),
            env_from(&[("NEWSCAST_FRAME_SIZE", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_sources(
            NewscastConfigFile::default(),
            env_from(&[("NEWSCAST_FRAME_SIZE", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_key_ignored() {
        let config = Config::from_sources(
            NewscastConfigFile::default(),
            env_from(&[("GEMINI_API_KEY", "  ")]),
        )
        .unwrap();
        assert!(config.api_key.is_none());
    }
}
