use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
pub const DEFAULT_PLACEHOLDER_BASE_URL: &str = "https://via.placeholder.com/600x400/7C3AED/FFFFFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineProfile {
    /// 2 to 6 panels.
    #[default]
    Standard,
    /// 2 to 12 panels.
    Extended,
}

impl PipelineProfile {
    pub fn config(&self) -> PipelineConfig {
        match self {
            PipelineProfile::Standard => PipelineConfig::default(),
            PipelineProfile::Extended => PipelineConfig {
                max_panels: 12,
                ..PipelineConfig::default()
            },
        }
    }
}

/// Models, pacing and limits of the comic pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub text_model: String,
    pub image_model: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub panel_delay_ms: u64,
    pub min_panels: u32,
    pub max_panels: u32,
    pub request_timeout_ms: u64,
    pub image_attempts: u32,
    pub gemini_base_url: String,
    pub placeholder_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_model: "gemini-1.5-flash".to_string(),
            image_model: "gemini-2.5-flash-image-preview".to_string(),
            max_retries: 5,
            base_delay_ms: 3000,
            max_delay_ms: 30000,
            jitter_ms: 1000,
            panel_delay_ms: 5000,
            min_panels: 2,
            max_panels: 6,
            request_timeout_ms: 60000,
            image_attempts: 2,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            placeholder_base_url: DEFAULT_PLACEHOLDER_BASE_URL.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn panel_delay(&self) -> Duration {
        Duration::from_millis(self.panel_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Limits and pacing of speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub model_id: String,
    pub max_characters: usize,
    pub max_chunk_size: usize,
    pub min_speed: f64,
    pub max_speed: f64,
    pub default_speed: f64,
    pub timeout_ms: u64,
    pub chunk_delay_ms: u64,
    pub panel_delay_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub error_cooldown_ms: u64,
    pub max_cooldown_ms: u64,
    pub base_url: String,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            model_id: "eleven_multilingual_v2".to_string(),
            max_characters: 5000,
            max_chunk_size: 4500,
            min_speed: 0.25,
            max_speed: 4.0,
            default_speed: 1.0,
            timeout_ms: 30000,
            chunk_delay_ms: 500,
            panel_delay_ms: 2000,
            rate_limit_cooldown_ms: 5000,
            error_cooldown_ms: 1000,
            max_cooldown_ms: 30000,
            base_url: DEFAULT_ELEVENLABS_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub profile: PipelineProfile,
    /// Full override of the profile's pipeline configuration.
    pub pipeline: Option<PipelineConfig>,
    pub narration: NarrationConfig,
    /// Include diagnostic details in failure responses.
    pub dev_mode: bool,
}

impl Settings {
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_else(|| self.profile.config())
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> Settings {
    let path = settings_path(data_dir);
    if let Ok(bytes) = fs::read(&path) {
        if let Ok(s) = serde_json::from_slice::<Settings>(&bytes) {
            return s;
        }
        tracing::warn!(path = %path.display(), "settings file unreadable, using defaults");
    }
    Settings::default()
}

pub fn save_settings_to_dir(data_dir: &Path, s: &Settings) -> Result<()> {
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(s)?;
    fs::write(path, json).context("write settings")?;
    Ok(())
}
