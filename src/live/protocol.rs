//! Wire messages for the live voice endpoint
//!
//! Client messages are externally tagged JSON objects (`{"setup": …}`,
//! `{"realtimeInput": …}`); server messages carry at most one of
//! `setupComplete`, `serverContent` or `goAway`.

use serde::{Deserialize, Serialize};

use super::channel::InboundEvent;
use crate::config::LiveConfig;
use crate::voice::TransportUnit;

/// Message sent by the client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a connection
    Setup(Setup),
    /// Streaming microphone input
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build the setup message for a session
    #[must_use]
    pub fn setup(config: &LiveConfig) -> Self {
        Self::Setup(Setup {
            model: format!("models/{}", config.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: (!config.system_prompt.is_empty()).then(|| Content {
                parts: vec![TextPart {
                    text: config.system_prompt.clone(),
                }],
            }),
            input_audio_transcription: config.input_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: config
                .output_transcription
                .then_some(TranscriptionConfig {}),
        })
    }

    /// Wrap one captured unit for the wire
    #[must_use]
    pub fn media(unit: &TransportUnit) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: unit.mime_type().to_string(),
                data: unit.to_transport_text(),
            }],
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Enables transcription; serializes as `{}`
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Message received from the server
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Parse one text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON object
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Whether this acknowledges the session setup
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Split into inbound events, preserving the order consumers rely on:
    /// user text, model text, audio parts, interruption, turn completion
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(text) = content.input_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            events.push(InboundEvent::PartialUserText(text));
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            events.push(InboundEvent::PartialModelText(text));
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|data| {
                        data.mime_type
                            .as_deref()
                            .is_none_or(|mime| mime.starts_with("audio/"))
                    })
                    .map(|data| InboundEvent::AudioFragment(data.data)),
            );
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }

        events
    }
}
