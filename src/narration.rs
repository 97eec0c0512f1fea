use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::chunker::{estimate_duration_secs, split_into_chunks};
use crate::elevenlabs::{CustomVoice, SpeechJob, SpeechSynthesizer};
use crate::error::{GenerationError, Result};
use crate::export::audio_data_uri;
use crate::pacing::SequentialPacer;
use crate::panels::ComicPanel;
use crate::settings::NarrationConfig;
use crate::speech_text::optimize_for_speech;
use crate::voice::{OutputFormat, VoiceOverrides, VoiceSettings, VoiceType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NarrationRequest {
    pub text: String,
    pub voice_type: Option<String>,
    pub speed: Option<f64>,
    pub voice_id: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
    pub model_id: Option<String>,
    pub language: Option<String>,
    pub output_format: Option<String>,
    pub enable_ssml: bool,
    pub optimize_for_streaming: bool,
    pub enhance_text: Option<bool>,
}

impl NarrationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationResult {
    pub audio_url: String,
    /// Estimated, in milliseconds.
    pub duration: u64,
    pub character_count: usize,
    pub estimated_tokens: usize,
    pub voice_used: String,
    pub processing_time: u64,
    pub audio_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_text: Option<String>,
    pub chunks: usize,
}

/// A request after validation, with presets and defaults resolved.
struct ResolvedRequest<'r> {
    voice_type: VoiceType,
    voice_id: &'r str,
    settings: VoiceSettings,
    speed: f64,
    format: OutputFormat,
    model_id: &'r str,
    language: &'r str,
}

/// Single-text speech synthesis with chunking for long input.
pub struct Narrator<'a> {
    speech: &'a dyn SpeechSynthesizer,
    config: &'a NarrationConfig,
}

impl<'a> Narrator<'a> {
    pub fn new(speech: &'a dyn SpeechSynthesizer, config: &'a NarrationConfig) -> Self {
        Self { speech, config }
    }

    fn resolve<'r>(&'r self, req: &'r NarrationRequest) -> Result<ResolvedRequest<'r>> {
        if req.text.trim().is_empty() {
            return Err(GenerationError::Validation("Text is required for narration".into()));
        }
        if req.text.chars().count() > self.config.max_characters {
            return Err(GenerationError::Validation(format!(
                "Text too long. Maximum {} characters allowed.",
                self.config.max_characters
            )));
        }
        let speed = req.speed.unwrap_or(self.config.default_speed);
        if !(self.config.min_speed..=self.config.max_speed).contains(&speed) {
            return Err(GenerationError::Validation(format!(
                "Speed must be between {} and {}",
                self.config.min_speed, self.config.max_speed
            )));
        }
        let format: OutputFormat = req.output_format.as_deref().unwrap_or("mp3").parse()?;
        let voice_type: VoiceType = req.voice_type.as_deref().unwrap_or("narrative").parse()?;

        let preset = voice_type.preset();
        let overrides = VoiceOverrides {
            stability: req.stability,
            similarity_boost: req.similarity_boost,
            style: req.style,
        };
        Ok(ResolvedRequest {
            voice_type,
            voice_id: req
                .voice_id
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(preset.voice_id),
            settings: preset.settings(&overrides),
            speed,
            format,
            model_id: req.model_id.as_deref().unwrap_or(&self.config.model_id),
            language: req.language.as_deref().unwrap_or("en"),
        })
    }

    #[instrument(skip(self, req), fields(chars = req.text.len()))]
    pub async fn narrate(&self, req: &NarrationRequest) -> Result<NarrationResult> {
        let started = Instant::now();
        let resolved = self.resolve(req)?;

        let enhance = req.enhance_text.unwrap_or(true);
        let processed = if enhance {
            optimize_for_speech(&req.text, req.enable_ssml)
        } else {
            req.text.clone()
        };
        let chunks = if processed.chars().count() > self.config.max_chunk_size {
            split_into_chunks(&processed, self.config.max_chunk_size)
        } else {
            vec![processed.clone()]
        };
        debug!(chunks = chunks.len(), voice = %resolved.voice_type, "synthesizing");

        let mut pacer = SequentialPacer::new();
        let mut audio = Vec::new();
        for chunk in &chunks {
            pacer.wait_turn().await;
            let job = SpeechJob {
                text: chunk,
                voice_id: resolved.voice_id,
                settings: resolved.settings,
                model_id: resolved.model_id,
                language: resolved.language,
                format: resolved.format,
                optimize_for_streaming: req.optimize_for_streaming,
            };
            audio.extend(self.speech.synthesize(&job).await?);
            pacer.cool_down(Duration::from_millis(self.config.chunk_delay_ms));
        }

        let character_count = processed.chars().count();
        let duration_secs = estimate_duration_secs(&processed, resolved.speed);
        Ok(NarrationResult {
            audio_url: audio_data_uri(&audio, resolved.format.as_str()),
            duration: (duration_secs * 1000.0).ceil() as u64,
            character_count,
            estimated_tokens: character_count.div_ceil(4),
            voice_used: format!(
                "{} ({})",
                resolved.voice_type.preset().description,
                resolved.voice_id
            ),
            processing_time: started.elapsed().as_millis() as u64,
            audio_format: resolved.format,
            optimized_text: enhance.then_some(processed),
            chunks: chunks.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NarrationOutcome {
    pub panels: Vec<ComicPanel>,
    pub success_count: usize,
}

/// Per-panel narration, one panel at a time.
pub struct NarrationPipeline<'a> {
    narrator: Narrator<'a>,
    config: &'a NarrationConfig,
}

impl<'a> NarrationPipeline<'a> {
    pub fn new(speech: &'a dyn SpeechSynthesizer, config: &'a NarrationConfig) -> Self {
        Self {
            narrator: Narrator::new(speech, config),
            config,
        }
    }

    /// Cooldown after the `failures`-th consecutive failure, doubling each
    /// time and capped at `max_cooldown_ms`.
    fn failure_cooldown(&self, rate_limited: bool, failures: u32) -> Duration {
        let base = if rate_limited {
            self.config.rate_limit_cooldown_ms
        } else {
            self.config.error_cooldown_ms
        };
        let factor = 2u64.saturating_pow(failures.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(self.config.max_cooldown_ms))
    }

    #[instrument(skip(self, panels), fields(panels = panels.len(), voice = %voice))]
    pub async fn attach_narration(&self, panels: Vec<ComicPanel>, voice: VoiceType) -> NarrationOutcome {
        let mut pacer = SequentialPacer::new();
        let mut success_count = 0;
        let mut consecutive_failures = 0u32;
        let mut narrated = Vec::with_capacity(panels.len());

        for mut panel in panels {
            let text = panel.speech_text();
            if text.is_empty() {
                debug!(panel = panel.id, "no text to narrate");
                narrated.push(panel);
                continue;
            }

            pacer.wait_turn().await;
            let req = NarrationRequest {
                voice_type: Some(voice.as_str().to_string()),
                ..NarrationRequest::new(text)
            };
            match self.narrator.narrate(&req).await {
                Ok(result) => {
                    info!(panel = panel.id, duration_ms = result.duration, "panel narrated");
                    panel.audio_url = Some(result.audio_url);
                    panel.audio_duration = Some(result.duration);
                    success_count += 1;
                    consecutive_failures = 0;
                    pacer.cool_down(Duration::from_millis(self.config.panel_delay_ms));
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let cooldown = self.failure_cooldown(e.is_rate_limited(), consecutive_failures);
                    warn!(
                        panel = panel.id,
                        error = %e,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "panel narration failed"
                    );
                    pacer.cool_down(cooldown);
                }
            }
            narrated.push(panel);
        }

        info!(success_count, total = narrated.len(), "narration pass finished");
        NarrationOutcome {
            panels: narrated,
            success_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetVoiceInfo {
    #[serde(rename = "type")]
    pub voice_type: VoiceType,
    pub voice_id: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub settings: VoiceSettings,
    pub recommended_for: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'static str>,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeedRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationLimits {
    pub max_characters: usize,
    pub max_chunk_size: usize,
    pub supported_formats: [OutputFormat; 3],
    pub speed_range: SpeedRange,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCatalogue {
    pub preset_voices: Vec<PresetVoiceInfo>,
    pub custom_voices: Vec<CustomVoice>,
    pub configuration: NarrationLimits,
    pub supported_languages: Vec<NamedItem>,
    pub supported_models: Vec<NamedItem>,
}

const LANGUAGES: [(&str, &str); 16] = [
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("pl", "Polish"),
    ("tr", "Turkish"),
    ("ru", "Russian"),
    ("nl", "Dutch"),
    ("cs", "Czech"),
    ("ar", "Arabic"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("hi", "Hindi"),
    ("ko", "Korean"),
];

const MODELS: [(&str, &str, &str); 3] = [
    ("eleven_multilingual_v2", "Multilingual V2", "Best for multiple languages with high quality"),
    ("eleven_monolingual_v1", "Monolingual V1", "Optimized for English only"),
    ("eleven_multilingual_v1", "Multilingual V1", "Legacy multilingual model"),
];

impl VoiceCatalogue {
    pub fn new(config: &NarrationConfig, custom_voices: Vec<CustomVoice>) -> Self {
        let preset_voices = VoiceType::ALL
            .into_iter()
            .map(|voice_type| {
                let preset = voice_type.preset();
                PresetVoiceInfo {
                    voice_type,
                    voice_id: preset.voice_id,
                    description: preset.description,
                    category: preset.category,
                    settings: preset.settings(&VoiceOverrides::default()),
                    recommended_for: voice_type.recommended_for(),
                }
            })
            .collect();

        Self {
            preset_voices,
            custom_voices,
            configuration: NarrationLimits {
                max_characters: config.max_characters,
                max_chunk_size: config.max_chunk_size,
                supported_formats: OutputFormat::ALL,
                speed_range: SpeedRange {
                    min: config.min_speed,
                    max: config.max_speed,
                    default: config.default_speed,
                },
                timeout: config.timeout_ms,
            },
            supported_languages: LANGUAGES
                .iter()
                .map(|&(code, name)| NamedItem {
                    code: Some(code),
                    id: None,
                    name,
                    description: None,
                })
                .collect(),
            supported_models: MODELS
                .iter()
                .map(|&(id, name, description)| NamedItem {
                    code: None,
                    id: Some(id),
                    name,
                    description: Some(description),
                })
                .collect(),
        }
    }
}
