use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{GenerationError, Result};
use crate::gemini::{ImageGenerator, TextGenerator};
use crate::panels::{ComicPanel, PanelPipeline};
use crate::settings::PipelineConfig;
use crate::story::{CharacterProfile, StoryBrief, StoryStructureGenerator};

pub const DEFAULT_CHARACTER_NAME: &str = "Hero";
pub const DEFAULT_ART_STYLE: &str = "modern comic book";
pub const DEFAULT_MOOD: &str = "adventurous";
pub const DEFAULT_PANELS: u32 = 4;

const RATE_LIMIT_ERROR: &str = "API rate limit exceeded. Please wait a moment and try again.";
const RATE_LIMIT_DETAILS: &str = "Too many requests - please try again in a few minutes.";
const GENERIC_ERROR: &str = "Failed to generate comic";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComicRequest {
    pub story_idea: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panels: Option<u32>,
    pub character_traits: Vec<String>,
}

fn non_blank(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl ComicRequest {
    /// Check bounds and fill defaults. Nothing upstream is called when this
    /// fails.
    pub fn validate(&self, config: &PipelineConfig) -> Result<StoryBrief> {
        let story_idea = self.story_idea.trim();
        if story_idea.is_empty() {
            return Err(GenerationError::Validation("Story idea is required".into()));
        }
        let panels = self.panels.unwrap_or(DEFAULT_PANELS);
        if panels < config.min_panels || panels > config.max_panels {
            return Err(GenerationError::Validation(format!(
                "Panel count must be between {} and {}",
                config.min_panels, config.max_panels
            )));
        }
        Ok(StoryBrief {
            story_idea: story_idea.to_string(),
            character_name: non_blank(&self.character_name, DEFAULT_CHARACTER_NAME),
            art_style: non_blank(&self.art_style, DEFAULT_ART_STYLE),
            mood: non_blank(&self.mood, DEFAULT_MOOD),
            panels,
            character_traits: self
                .character_traits
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicStory {
    pub title: String,
    pub character_profile: CharacterProfile,
    pub story_arc: String,
    pub panels: Vec<ComicPanel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicMetadata {
    pub panels_generated: usize,
    /// Panels with real inline image data rather than a placeholder.
    pub images_generated: usize,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comic: Option<ComicStory>,
    /// Milliseconds.
    pub generation_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ComicMetadata>,
    /// HTTP-style status: 200, 400, 429 or 500.
    #[serde(skip)]
    pub status: u16,
}

impl ComicResponse {
    pub fn completed(story: ComicStory, generation_time: u64, model: &str) -> Self {
        let metadata = ComicMetadata {
            panels_generated: story.panels.len(),
            images_generated: story.panels.iter().filter(|p| p.has_inline_image()).count(),
            model: model.to_string(),
        };
        Self {
            success: true,
            comic: Some(story),
            generation_time,
            error: None,
            details: None,
            metadata: Some(metadata),
            status: 200,
        }
    }

    /// Map an error onto the user-facing failure shape. Rate limits get their
    /// own message; other failures only carry details in dev mode.
    pub fn failure(err: &GenerationError, generation_time: u64, dev_mode: bool) -> Self {
        let (status, error, details) = if err.is_request_error() {
            (400, err.to_string(), None)
        } else if err.is_rate_limited() {
            (429, RATE_LIMIT_ERROR.to_string(), Some(RATE_LIMIT_DETAILS.to_string()))
        } else {
            (500, GENERIC_ERROR.to_string(), dev_mode.then(|| err.to_string()))
        };
        Self {
            success: false,
            comic: None,
            generation_time,
            error: Some(error),
            details,
            metadata: None,
            status,
        }
    }
}

/// Outline stage followed by the panel stage, for one request.
pub struct ComicGenerator<'a> {
    text: &'a dyn TextGenerator,
    images: &'a dyn ImageGenerator,
    config: &'a PipelineConfig,
    dev_mode: bool,
}

impl<'a> ComicGenerator<'a> {
    pub fn new(
        text: &'a dyn TextGenerator,
        images: &'a dyn ImageGenerator,
        config: &'a PipelineConfig,
        dev_mode: bool,
    ) -> Self {
        Self {
            text,
            images,
            config,
            dev_mode,
        }
    }

    #[instrument(skip(self, request), fields(panels = ?request.panels))]
    pub async fn generate(&self, request: &ComicRequest) -> ComicResponse {
        let started = Instant::now();
        let brief = match request.validate(self.config) {
            Ok(brief) => brief,
            Err(e) => {
                warn!(error = %e, "comic request rejected");
                return ComicResponse::failure(&e, 0, self.dev_mode);
            }
        };
        info!(idea = %brief.story_idea, panels = brief.panels, "starting comic generation");

        let outline = StoryStructureGenerator::new(self.text, self.config.retry_policy())
            .build_outline(&brief)
            .await;
        let panels = PanelPipeline::new(self.text, self.images, self.config, &brief.art_style)
            .build_panels(&outline, brief.panels)
            .await;

        let story = ComicStory {
            title: outline.title,
            character_profile: outline.character,
            story_arc: outline.arc,
            panels,
        };
        let elapsed = started.elapsed().as_millis() as u64;
        info!(generation_time_ms = elapsed, title = %story.title, "comic generation completed");
        ComicResponse::completed(story, elapsed, &self.config.image_model)
    }
}
