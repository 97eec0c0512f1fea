use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{GenerationError, Result};
use crate::settings::NarrationConfig;
use crate::voice::{OutputFormat, VoiceSettings};

const PROVIDER: &str = "elevenlabs";

/// One synthesis call: a single chunk of text in a single voice.
#[derive(Debug, Clone)]
pub struct SpeechJob<'a> {
    pub text: &'a str,
    pub voice_id: &'a str,
    pub settings: VoiceSettings,
    pub model_id: &'a str,
    pub language: &'a str,
    pub format: OutputFormat,
    pub optimize_for_streaming: bool,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Raw audio bytes for one chunk.
    async fn synthesize(&self, job: &SpeechJob<'_>) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct SpeechRequestBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimize_streaming_latency: Option<u8>,
}

impl<'a> SpeechRequestBody<'a> {
    fn from_job(job: &SpeechJob<'a>) -> Self {
        Self {
            text: job.text,
            model_id: job.model_id,
            voice_settings: job.settings,
            language_code: (job.language != "en").then_some(job.language),
            optimize_streaming_latency: job.optimize_for_streaming.then_some(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomVoice {
    pub voice_id: String,
    pub name: String,
    pub category: String,
    pub language: Option<String>,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Option<Vec<VoiceEntry>>,
}

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    voice_id: String,
    name: String,
    category: Option<String>,
    language: Option<String>,
}

impl From<VoiceEntry> for CustomVoice {
    fn from(v: VoiceEntry) -> Self {
        Self {
            description: format!("Custom voice: {}", v.name),
            category: v.category.unwrap_or_else(|| "custom".to_string()),
            voice_id: v.voice_id,
            name: v.name,
            language: v.language,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ElevenLabsClient {
    pub fn new(api_key: impl Into<String>, config: &NarrationConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey("ElevenLabs"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, voice_id: &str, format: OutputFormat) -> String {
        if format.is_streamed() {
            format!("{}/text-to-speech/{}/stream", self.base_url, voice_id)
        } else {
            format!("{}/text-to-speech/{}", self.base_url, voice_id)
        }
    }

    /// Voices on the account. Failures are logged and yield an empty list.
    pub async fn list_voices(&self) -> Vec<CustomVoice> {
        let resp = self
            .client
            .get(format!("{}/voices", self.base_url))
            .header("xi-api-key", &self.api_key)
            .send()
            .await;
        let parsed = match resp {
            Ok(r) if r.status().is_success() => r.json::<VoicesResponse>().await,
            Ok(r) => {
                warn!(status = %r.status(), "failed to fetch custom voices");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch custom voices");
                return Vec::new();
            }
        };
        match parsed {
            Ok(body) => body
                .voices
                .unwrap_or_default()
                .into_iter()
                .map(CustomVoice::from)
                .collect(),
            Err(e) => {
                warn!(error = %e, "custom voice list parse error");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    #[instrument(skip(self, job), fields(voice_id = %job.voice_id, chars = job.text.len(), format = %job.format))]
    async fn synthesize(&self, job: &SpeechJob<'_>) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(self.endpoint(job.voice_id, job.format))
            .header("xi-api-key", &self.api_key)
            .header("Accept", job.format.accept_header())
            .json(&SpeechRequestBody::from_job(job))
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "speech synthesis rejected");
            return Err(GenerationError::from_status(PROVIDER, status.as_u16(), text));
        }

        let mut audio = Vec::new();
        if job.format.is_streamed() {
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;
                audio.extend_from_slice(&bytes);
            }
        } else {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;
            audio.extend_from_slice(&bytes);
        }

        if audio.is_empty() {
            return Err(GenerationError::EmptyGeneration {
                provider: PROVIDER,
                reason: "no audio in response".to_string(),
            });
        }
        debug!(bytes = audio.len(), "audio received");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, Reply};
    use crate::voice::{VoiceOverrides, VoiceType};

    fn job(language: &str, streaming: bool) -> SpeechJob<'_> {
        SpeechJob {
            text: "Once upon a time.",
            voice_id: "voice-1",
            settings: VoiceType::Narrative.preset().settings(&VoiceOverrides::default()),
            model_id: "eleven_multilingual_v2",
            language,
            format: OutputFormat::Mp3,
            optimize_for_streaming: streaming,
        }
    }

    #[test]
    fn english_request_omits_language_code() {
        let body = serde_json::to_value(SpeechRequestBody::from_job(&job("en", false))).unwrap();
        assert_eq!(body["text"], "Once upon a time.");
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
        assert_eq!(body["voice_settings"]["use_speaker_boost"], true);
        assert!(body.get("language_code").is_none());
        assert!(body.get("optimize_streaming_latency").is_none());
    }

    #[test]
    fn other_languages_and_streaming_flags_are_sent() {
        let body = serde_json::to_value(SpeechRequestBody::from_job(&job("fr", true))).unwrap();
        assert_eq!(body["language_code"], "fr");
        assert_eq!(body["optimize_streaming_latency"], 1);
    }

    #[test]
    fn pcm_uses_stream_endpoint() {
        let client = ElevenLabsClient::new("key", &NarrationConfig::default()).unwrap();
        assert_eq!(
            client.endpoint("abc", OutputFormat::Pcm),
            "https://api.elevenlabs.io/v1/text-to-speech/abc/stream"
        );
        assert_eq!(
            client.endpoint("abc", OutputFormat::Wav),
            "https://api.elevenlabs.io/v1/text-to-speech/abc"
        );
    }

    fn stub_client(base_url: &str) -> ElevenLabsClient {
        let config = NarrationConfig {
            base_url: base_url.to_string(),
            ..NarrationConfig::default()
        };
        ElevenLabsClient::new("el-key", &config).unwrap()
    }

    #[tokio::test]
    async fn mp3_synthesis_posts_to_voice_endpoint() {
        let (base, server) = serve_once(Reply::bytes(200, "audio/mpeg", b"ID3audio")).await;
        let client = stub_client(&base);

        let audio = client.synthesize(&job("en", false)).await.unwrap();
        assert_eq!(audio, b"ID3audio");

        let req = server.await.unwrap();
        assert!(req.head.starts_with("post /text-to-speech/voice-1 http/1.1"), "{}", req.head);
        assert!(req.head.contains("xi-api-key: el-key"));
        assert!(req.head.contains("accept: audio/mpeg"));
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["text"], "Once upon a time.");
    }

    #[tokio::test]
    async fn pcm_synthesis_reads_the_stream_endpoint() {
        let (base, server) = serve_once(Reply::bytes(200, "audio/pcm", &[1, 2, 3, 4])).await;
        let client = stub_client(&base);
        let mut pcm = job("en", true);
        pcm.format = OutputFormat::Pcm;

        let audio = client.synthesize(&pcm).await.unwrap();
        assert_eq!(audio, vec![1, 2, 3, 4]);

        let req = server.await.unwrap();
        assert!(req.head.starts_with("post /text-to-speech/voice-1/stream http/1.1"), "{}", req.head);
        assert!(req.head.contains("accept: audio/pcm"));
    }

    #[tokio::test]
    async fn empty_audio_is_empty_generation() {
        let (base, server) = serve_once(Reply::bytes(200, "audio/mpeg", b"")).await;
        let err = stub_client(&base).synthesize(&job("en", false)).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, GenerationError::EmptyGeneration { provider: "elevenlabs", .. }));
    }

    #[tokio::test]
    async fn rejected_synthesis_maps_status() {
        let (base, server) = serve_once(Reply::bytes(401, "application/json", b"{\"detail\":\"bad key\"}")).await;
        let err = stub_client(&base).synthesize(&job("en", false)).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, GenerationError::UpstreamHttp { status: 401, .. }));
        assert!(!err.is_rate_limited());

        let (base, server) = serve_once(Reply::bytes(429, "text/plain", b"too many")).await;
        let err = stub_client(&base).synthesize(&job("en", false)).await.unwrap_err();
        server.await.unwrap();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn list_voices_reads_account_voices() {
        let (base, server) = serve_once(Reply::json(
            200,
            serde_json::json!({ "voices": [{ "voice_id": "v9", "name": "Nova" }] }),
        ))
        .await;
        let voices = stub_client(&base).list_voices().await;
        let req = server.await.unwrap();

        assert!(req.head.starts_with("get /voices http/1.1"), "{}", req.head);
        assert!(req.head.contains("xi-api-key: el-key"));
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].voice_id, "v9");
        assert_eq!(voices[0].category, "custom");
    }

    #[tokio::test]
    async fn list_voices_failure_is_empty() {
        let (base, server) = serve_once(Reply::bytes(500, "text/plain", b"oops")).await;
        let voices = stub_client(&base).list_voices().await;
        server.await.unwrap();
        assert!(voices.is_empty());
    }

    #[test]
    fn voice_entries_default_to_custom_category() {
        let body: VoicesResponse = serde_json::from_str(
            r#"{"voices": [{"voice_id": "v1", "name": "Ada"}, {"voice_id": "v2", "name": "Bo", "category": "cloned", "language": "en"}]}"#,
        )
        .unwrap();
        let voices: Vec<CustomVoice> = body.voices.unwrap().into_iter().map(CustomVoice::from).collect();
        assert_eq!(voices[0].category, "custom");
        assert_eq!(voices[0].description, "Custom voice: Ada");
        assert_eq!(voices[1].category, "cloned");
    }
}
