//! One-shot generative API client
//!
//! Grounded news summaries, multi-speaker speech synthesis, and plain text
//! replies over the `generateContent` REST endpoint.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{Config, GenAiConfig, PodcastHost};
use crate::voice::codec;
use crate::{Error, Result};

const QUICK_REPLY_INSTRUCTION: &str =
    "You are a helpful assistant answering questions about Nigerian news. Be concise and quick.";

const ANALYST_INSTRUCTION: &str = "You are an expert analyst. Provide detailed, thoughtful, and \
     well-reasoned responses to complex questions about Nigerian affairs.";

/// Script prompt for a two-host news briefing
fn news_prompt(hosts: &[PodcastHost]) -> String {
    let first = hosts.first().map_or("Bayo", |h| h.name.as_str());
    let second = hosts.get(1).map_or("Chioma", |h| h.name.as_str());
    format!(
        "Create a detailed summary of today's most important news stories from Nigeria, \
         covering various sectors like politics, economy, technology, and social issues.\n\
         Source your information from reputable Nigerian news outlets like punch.ng, \
         The Vanguard, and The Nation newspaper.\n\
         Present the summary as a conversational dialogue script between two podcast hosts, \
         {first} and {second}.\n\
         Start the podcast with a brief, friendly introduction. For example: {first}: \
         \"Welcome to Naija NewsCast, your daily briefing on all things Nigeria! \
         What's leading the news today, {second}?\"\n\
         Ensure the dialogue flows naturally, with each host contributing to the discussion \
         of the news items.\n\
         The entire script should be what is TTS'd."
    )
}

/// A web page the summary was grounded on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

/// Dialogue script for today's news, with its sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsBriefing {
    pub summary: String,
    pub sources: Vec<Source>,
}

/// `generateContent` response, reduced to the fields used here
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
    /// Set on thought-summary parts, which are not part of the answer
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl GenerateResponse {
    fn first(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// Concatenated answer text of the first candidate
    fn text(&self) -> String {
        self.first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inline data of the first part, as transport text
    fn first_inline_data(&self) -> Option<&str> {
        self.first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
            .map(|d| d.data.as_str())
    }

    fn sources(&self) -> Vec<Source> {
        self.first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| {
                meta.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref())
                    .filter_map(|web| {
                        let uri = web.uri.clone()?;
                        Some(Source {
                            title: web.title.clone().unwrap_or_else(|| uri.clone()),
                            uri,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn news_request(hosts: &[PodcastHost]) -> Value {
    json!({
        "contents": [{"parts": [{"text": news_prompt(hosts)}]}],
        "tools": [{"googleSearch": {}}],
    })
}

fn dialogue_request(script: &str, hosts: &[PodcastHost]) -> Value {
    let speakers: Vec<Value> = hosts
        .iter()
        .map(|h| {
            json!({
                "speaker": h.name,
                "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": h.voice}},
            })
        })
        .collect();

    json!({
        "contents": [{"parts": [{"text": script}]}],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "multiSpeakerVoiceConfig": {"speakerVoiceConfigs": speakers},
            },
        },
    })
}

fn text_request(prompt: &str, instruction: &str, thinking_budget: Option<u32>) -> Value {
    let mut request = json!({
        "contents": [{"parts": [{"text": prompt}]}],
        "systemInstruction": {"parts": [{"text": instruction}]},
    });
    if let Some(budget) = thinking_budget {
        request["generationConfig"] = json!({"thinkingConfig": {"thinkingBudget": budget}});
    }
    request
}

/// Client for one-shot generation requests
pub struct GenAiClient {
    client: reqwest::Client,
    api_key: SecretString,
    config: GenAiConfig,
}

impl GenAiClient {
    #[must_use]
    pub fn new(api_key: SecretString, config: GenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        }
    }

    /// Create a client from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.require_api_key()?.clone(),
            config.genai.clone(),
        ))
    }

    /// Today's Nigerian news as a two-host dialogue script, grounded on
    /// web search
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the model returns no text
    pub async fn news_summary(&self) -> Result<NewsBriefing> {
        let response = self
            .generate(&self.config.news_model, &news_request(&self.config.hosts))
            .await?;

        let summary = response.text();
        if summary.trim().is_empty() {
            return Err(Error::GenAi("no summary text in response".to_string()));
        }
        let sources = response.sources();
        tracing::debug!(
            chars = summary.len(),
            sources = sources.len(),
            "news summary generated"
        );

        Ok(NewsBriefing { summary, sources })
    }

    /// Speak a dialogue script with one voice per host
    ///
    /// Returns raw 24kHz 16-bit little-endian mono PCM.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or no audio comes back
    pub async fn synthesize_dialogue(&self, script: &str) -> Result<Vec<u8>> {
        let response = self
            .generate(
                &self.config.tts_model,
                &dialogue_request(script, &self.config.hosts),
            )
            .await?;

        let data = response
            .first_inline_data()
            .ok_or_else(|| Error::GenAi("No audio data received from TTS API.".to_string()))?;
        let pcm = codec::transport_text_to_bytes(data)?;

        tracing::debug!(bytes = pcm.len(), "dialogue synthesized");
        Ok(pcm)
    }

    /// Short answer from the low-latency model
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn quick_reply(&self, prompt: &str) -> Result<String> {
        let request = text_request(prompt, QUICK_REPLY_INSTRUCTION, None);
        Ok(self.generate(&self.config.chat_model, &request).await?.text())
    }

    /// Considered answer from the reasoning model
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn deep_analysis(&self, prompt: &str) -> Result<String> {
        let request = text_request(
            prompt,
            ANALYST_INSTRUCTION,
            Some(self.config.thinking_budget),
        );
        Ok(self
            .generate(&self.config.analysis_model, &request)
            .await?
            .text())
    }

    async fn generate(&self, model: &str, request: &Value) -> Result<GenerateResponse> {
        let url = format!(
            "{}/models/{model}:generateContent",
            self.config.base_url.trim_end_matches('/')
        );
        tracing::debug!(%model, "generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GenAi(format!("{model} error {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<PodcastHost> {
        GenAiConfig::default().hosts
    }

    #[test]
    fn test_news_request_enables_search() {
        let request = news_request(&hosts());
        assert_eq!(request["tools"], json!([{"googleSearch": {}}]));
        let prompt = request["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Bayo and Chioma"));
        assert!(prompt.contains("Welcome to Naija NewsCast"));
    }

    #[test]
    fn test_dialogue_request_assigns_voices() {
        let request = dialogue_request("Bayo: Hi\nChioma: Hello", &hosts());
        let speakers = &request["generationConfig"]["speechConfig"]["multiSpeakerVoiceConfig"]
            ["speakerVoiceConfigs"];
        assert_eq!(speakers[0]["speaker"], "Bayo");
        assert_eq!(
            speakers[0]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(speakers[1]["speaker"], "Chioma");
        assert_eq!(
            speakers[1]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            request["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
    }

    #[test]
    fn test_text_request_thinking_budget_optional() {
        let quick = text_request("q", QUICK_REPLY_INSTRUCTION, None);
        assert!(quick.get("generationConfig").is_none());
        assert_eq!(
            quick["systemInstruction"]["parts"][0]["text"],
            QUICK_REPLY_INSTRUCTION
        );

        let deep = text_request("q", ANALYST_INSTRUCTION, Some(32768));
        assert_eq!(
            deep["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            32768
        );
    }

    #[test]
    fn test_response_text_and_sources() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Bayo: Welcome. "},
                    {"text": "Chioma: Thanks."}
                ]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://punchng.com/a", "title": "punchng.com"}},
                    {"web": {"uri": "https://vanguardngr.com/b"}},
                    {"retrievedContext": {}}
                ]}
            }]
        }))
        .unwrap();

        assert_eq!(response.text(), "Bayo: Welcome. Chioma: Thanks.");
        assert_eq!(
            response.sources(),
            vec![
                Source {
                    title: "punchng.com".to_string(),
                    uri: "https://punchng.com/a".to_string()
                },
                Source {
                    title: "https://vanguardngr.com/b".to_string(),
                    uri: "https://vanguardngr.com/b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_empty_response_has_no_text_or_audio() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.text().is_empty());
        assert!(response.first_inline_data().is_none());
        assert!(response.sources().is_empty());
    }

    #[test]
    fn test_audio_part_found() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "audio/L16;rate=24000", "data": "AAEC"}}
            ]}}]
        }))
        .unwrap();
        assert_eq!(response.first_inline_data(), Some("AAEC"));
    }
}
