use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceType {
    #[default]
    Narrative,
    Character,
    Dramatic,
    Casual,
    Child,
    Elderly,
}

/// Tuning parameters for one narration voice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoicePreset {
    #[serde(rename = "voiceId")]
    pub voice_id: &'static str,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub description: &'static str,
    pub category: &'static str,
}

const NARRATIVE: VoicePreset = VoicePreset {
    voice_id: "21m00Tcm4TlvDq8ikWAM",
    stability: 0.7,
    similarity_boost: 0.8,
    style: 0.2,
    use_speaker_boost: true,
    description: "Professional narrator voice - ideal for storytelling and narration",
    category: "professional",
};

const CHARACTER: VoicePreset = VoicePreset {
    voice_id: "EXAVITQu4vr4xnSDxMaL",
    stability: 0.4,
    similarity_boost: 0.7,
    style: 0.6,
    use_speaker_boost: true,
    description: "Expressive character voice - perfect for dialogue and character speech",
    category: "expressive",
};

const DRAMATIC: VoicePreset = VoicePreset {
    voice_id: "ErXwobaYiN019PkySvjV",
    stability: 0.6,
    similarity_boost: 0.9,
    style: 0.8,
    use_speaker_boost: true,
    description: "Dramatic storytelling voice - excellent for intense scenes and emotion",
    category: "dramatic",
};

const CASUAL: VoicePreset = VoicePreset {
    voice_id: "VR6AewLTigWG4xSOukaG",
    stability: 0.5,
    similarity_boost: 0.6,
    style: 0.3,
    use_speaker_boost: false,
    description: "Casual friendly voice - great for conversational content",
    category: "casual",
};

const CHILD: VoicePreset = VoicePreset {
    voice_id: "ThT5KcBeYPX3keUQqHPh",
    stability: 0.3,
    similarity_boost: 0.7,
    style: 0.4,
    use_speaker_boost: false,
    description: "Young voice - suitable for children content and playful narration",
    category: "character",
};

const ELDERLY: VoicePreset = VoicePreset {
    voice_id: "MF3mGyEYCl7XYWbV9V6O",
    stability: 0.8,
    similarity_boost: 0.8,
    style: 0.3,
    use_speaker_boost: true,
    description: "Mature voice - perfect for wise characters and formal content",
    category: "character",
};

impl VoiceType {
    pub const ALL: [VoiceType; 6] = [
        VoiceType::Narrative,
        VoiceType::Character,
        VoiceType::Dramatic,
        VoiceType::Casual,
        VoiceType::Child,
        VoiceType::Elderly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceType::Narrative => "narrative",
            VoiceType::Character => "character",
            VoiceType::Dramatic => "dramatic",
            VoiceType::Casual => "casual",
            VoiceType::Child => "child",
            VoiceType::Elderly => "elderly",
        }
    }

    pub fn preset(&self) -> &'static VoicePreset {
        match self {
            VoiceType::Narrative => &NARRATIVE,
            VoiceType::Character => &CHARACTER,
            VoiceType::Dramatic => &DRAMATIC,
            VoiceType::Casual => &CASUAL,
            VoiceType::Child => &CHILD,
            VoiceType::Elderly => &ELDERLY,
        }
    }

    pub fn recommended_for(&self) -> &'static [&'static str] {
        match self {
            VoiceType::Narrative => &["Audiobooks", "Storytelling", "News reading", "Educational content"],
            VoiceType::Character => &["Dialogue", "Character voices", "Interactive content", "Gaming"],
            VoiceType::Dramatic => &["Theatrical content", "Emotional scenes", "Presentations", "Poetry"],
            VoiceType::Casual => &["Conversational content", "Friendly explanations", "Social media", "Tutorials"],
            VoiceType::Child => &["Children content", "Playful narration", "Educational for kids", "Animation"],
            VoiceType::Elderly => &["Formal content", "Wise characters", "Historical narration", "Documentary"],
        }
    }
}

impl fmt::Display for VoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceType {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VoiceType::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = VoiceType::ALL.iter().map(|v| v.as_str()).collect();
                GenerationError::Validation(format!(
                    "Unsupported voice type. Available types: {}",
                    names.join(", ")
                ))
            })
    }
}

/// The `voice_settings` object sent to the speech provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoiceOverrides {
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
}

impl VoicePreset {
    /// Preset values with any overrides applied, clamped to `[0, 1]`.
    pub fn settings(&self, overrides: &VoiceOverrides) -> VoiceSettings {
        let clamp = |v: f32| v.clamp(0.0, 1.0);
        VoiceSettings {
            stability: clamp(overrides.stability.unwrap_or(self.stability)),
            similarity_boost: clamp(overrides.similarity_boost.unwrap_or(self.similarity_boost)),
            style: clamp(overrides.style.unwrap_or(self.style)),
            use_speaker_boost: self.use_speaker_boost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
    Pcm,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Mp3, OutputFormat::Wav, OutputFormat::Pcm];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
            OutputFormat::Pcm => "pcm",
        }
    }

    pub fn accept_header(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Wav => "audio/wav",
            OutputFormat::Pcm => "audio/pcm",
        }
    }

    /// PCM is served from the streaming endpoint.
    pub fn is_streamed(&self) -> bool {
        matches!(self, OutputFormat::Pcm)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                GenerationError::Validation(
                    "Unsupported output format. Supported formats: mp3, wav, pcm".to_string(),
                )
            })
    }
}
