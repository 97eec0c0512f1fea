use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{GenerationError, Result};
use crate::export::{decode_base64_payload, image_data_uri};
use crate::gemini::{extract_inline_image, ImageGenerator, TextGenerator};
use crate::pacing::SequentialPacer;
use crate::retry::run_with_backoff;
use crate::sanitize::sanitize;
use crate::settings::PipelineConfig;
use crate::story::{PanelOutline, StoryOutline};

const PANEL_TEMPERATURE: f32 = 0.7;
const IMAGE_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicPanel {
    pub id: u32,
    pub image_description: String,
    pub dialogue: Vec<String>,
    pub narration: String,
    pub character_emotions: String,
    pub scene_action: String,
    pub visual_elements: Vec<String>,
    pub continuity_notes: String,
    /// Inline data URI or a placeholder URL.
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<u64>,
}

impl ComicPanel {
    pub fn has_inline_image(&self) -> bool {
        self.image_url.starts_with("data:")
    }

    /// Narration followed by the dialogue lines, as one blob for speech.
    pub fn speech_text(&self) -> String {
        format!("{} {}", self.narration, self.dialogue.join(" "))
            .trim()
            .to_string()
    }
}

/// `<base>?text=Panel+<n>+-+<label>`.
pub fn placeholder_url(base: &str, panel_number: u32, label: &str) -> String {
    let text = format!("Panel {panel_number} - {label}");
    match reqwest::Url::parse_with_params(base, &[("text", text.as_str())]) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}?text=Panel+{panel_number}"),
    }
}

fn placeholder_label(entry: &PanelOutline) -> &str {
    if entry.purpose.trim().is_empty() {
        "Comic Panel"
    } else {
        &entry.purpose
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Network-free panel content for one outline entry, with a placeholder image.
pub fn synthesize_fallback_panel(
    id: u32,
    entry: &PanelOutline,
    outline: &StoryOutline,
    placeholder_base: &str,
) -> ComicPanel {
    let character = &outline.character;
    let key_action = or_default(&entry.key_action, "continues the adventure");
    let setting = or_default(&entry.setting_description, "an engaging scene");

    ComicPanel {
        id,
        image_description: format!(
            "Panel {id}: {} (detailed appearance: {}) {key_action} in {setting}",
            character.name, character.appearance
        ),
        dialogue: vec![format!("\"{key_action}.\"")],
        narration: or_default(
            &entry.key_action,
            "The adventure continues as our hero faces new challenges in this panel of the story.",
        )
        .to_string(),
        character_emotions: or_default(&entry.character_state, "determined and focused").to_string(),
        scene_action: or_default(&entry.key_action, "story progression with character development")
            .to_string(),
        visual_elements: vec![
            "consistent character design".to_string(),
            "engaging composition".to_string(),
            "dramatic lighting".to_string(),
            "comic style".to_string(),
        ],
        continuity_notes: format!(
            "Maintains {}'s consistent appearance: {}",
            character.name, character.appearance
        ),
        image_url: placeholder_url(placeholder_base, id, placeholder_label(entry)),
        audio_url: None,
        audio_duration: None,
    }
}

pub fn panel_prompt(index: u32, total: u32, entry: &PanelOutline, outline: &StoryOutline) -> String {
    let character = &outline.character;
    let key_action = or_default(&entry.key_action, "story progression");
    let setting = or_default(&entry.setting_description, "story scene");
    format!(
        r#"Create detailed comic panel content for panel {index} of {total}.

STORY CONTEXT:
- Title: {title}
- Character: {name}
- Appearance: {appearance}
- Current State: {state}
- Action: {key_action}
- Setting: {setting}

REQUIREMENTS: Create content for 45-60 second narration. Respond with ONLY valid JSON.
{{
  "imageDescription": "DETAILED comic panel description: Character ({appearance}) doing {key_action} in {setting}. Include pose, expression, background details, lighting, comic book art style",
  "dialogue": ["Character speech - 2-3 lines for natural conversation flow"],
  "narration": "Rich narrative text of 2-3 sentences describing the scene for engaging 45-60 second voiceover",
  "characterEmotions": "Detailed emotional state and facial expressions",
  "sceneAction": "Comprehensive action description with visual details",
  "visualElements": ["Specific lighting", "Background details", "Character positioning", "Comic style elements"],
  "continuityNotes": "Notes for maintaining character consistency across panels"
}}"#,
        title = outline.title,
        name = character.name,
        appearance = character.appearance,
        state = or_default(&entry.character_state, "determined"),
    )
}

pub fn image_prompt(
    index: u32,
    total: u32,
    panel: &ComicPanel,
    entry: &PanelOutline,
    outline: &StoryOutline,
    art_style: &str,
) -> String {
    let character = &outline.character;
    format!(
        r#"Generate a high-quality comic book panel illustration:

CHARACTER: {name}
APPEARANCE: {appearance}
SCENE: {scene}
SETTING: {setting}
ACTION: {action}
MOOD: {mood}
STYLE: {art_style} - professional comic book art style

VISUAL REQUIREMENTS:
- Comic book panel layout with clear composition
- Consistent character design matching: {appearance}
- Dynamic {action} action
- {elements} visual elements
- Panel {index} of {total} in sequence

Create a detailed, high-quality comic panel that maintains character consistency and tells the story effectively."#,
        name = character.name,
        appearance = character.appearance,
        scene = panel.image_description,
        setting = entry.setting_description,
        action = entry.key_action,
        mood = character.personality,
        elements = panel.visual_elements.join(", "),
    )
}

fn string_field(content: &Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Build a panel from model content, filling any missing field.
///
/// `dialogue` accepts a bare string and is never left empty; `visualElements`
/// defaults to empty.
pub fn normalize_panel(id: u32, content: &Value, entry: &PanelOutline, image_url: String) -> ComicPanel {
    let mut dialogue = string_list(content.get("dialogue"));
    if dialogue.is_empty() {
        let line = or_default(&entry.key_action, "Let's keep going");
        dialogue.push(format!("\"{line}.\""));
    }

    ComicPanel {
        id,
        image_description: string_field(content, "imageDescription")
            .unwrap_or_else(|| format!("Panel {id} visual description")),
        dialogue,
        narration: string_field(content, "narration")
            .unwrap_or_else(|| format!("Panel {id} narration for 45-60 second voiceover")),
        character_emotions: string_field(content, "characterEmotions")
            .unwrap_or_else(|| "determined".to_string()),
        scene_action: string_field(content, "sceneAction")
            .unwrap_or_else(|| "story progression".to_string()),
        visual_elements: string_list(content.get("visualElements")),
        continuity_notes: string_field(content, "continuityNotes")
            .unwrap_or_else(|| "Character consistency maintained".to_string()),
        image_url,
        audio_url: None,
        audio_duration: None,
    }
}

fn parse_panel_content(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(&sanitize(raw))
        .map_err(|e| GenerationError::MalformedResponse(format!("panel content is not valid JSON: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(GenerationError::MalformedResponse(
            "panel content is not a JSON object".to_string(),
        ))
    }
}

/// Panel stage of the pipeline. Always yields one panel per requested index.
pub struct PanelPipeline<'a> {
    text: &'a dyn TextGenerator,
    images: &'a dyn ImageGenerator,
    config: &'a PipelineConfig,
    art_style: &'a str,
}

impl<'a> PanelPipeline<'a> {
    pub fn new(
        text: &'a dyn TextGenerator,
        images: &'a dyn ImageGenerator,
        config: &'a PipelineConfig,
        art_style: &'a str,
    ) -> Self {
        Self {
            text,
            images,
            config,
            art_style,
        }
    }

    #[instrument(skip(self, outline), fields(title = %outline.title))]
    pub async fn build_panels(&self, outline: &StoryOutline, panel_count: u32) -> Vec<ComicPanel> {
        let mut pacer = SequentialPacer::new();
        let mut panels = Vec::with_capacity(panel_count as usize);
        let empty = PanelOutline::default();

        for i in 0..panel_count {
            pacer.wait_turn().await;
            let id = i + 1;
            let entry = outline.panel_outlines.get(i as usize).unwrap_or(&empty);
            info!(panel = id, total = panel_count, "generating panel");

            let panel = self.build_panel(id, panel_count, entry, outline).await;
            panels.push(panel);
            pacer.cool_down(self.config.panel_delay());
        }

        info!(panels = panels.len(), "all panels generated");
        panels
    }

    async fn build_panel(&self, id: u32, total: u32, entry: &PanelOutline, outline: &StoryOutline) -> ComicPanel {
        let placeholder = placeholder_url(&self.config.placeholder_base_url, id, placeholder_label(entry));

        let mut panel = match self.panel_content(id, total, entry, outline).await {
            Ok(content) => normalize_panel(id, &content, entry, placeholder.clone()),
            Err(e) => {
                warn!(panel = id, error = %e, "panel content unavailable, using fallback panel");
                synthesize_fallback_panel(id, entry, outline, &self.config.placeholder_base_url)
            }
        };

        let prompt = image_prompt(id, total, &panel, entry, outline, self.art_style);
        match self.panel_image(&prompt).await {
            Ok(Some(uri)) => {
                debug!(panel = id, "panel image generated");
                panel.image_url = uri;
            }
            Ok(None) => warn!(panel = id, "no inline image in response, using placeholder"),
            Err(e) => warn!(panel = id, error = %e, "panel image failed, using placeholder"),
        }
        panel
    }

    async fn panel_content(&self, id: u32, total: u32, entry: &PanelOutline, outline: &StoryOutline) -> Result<Value> {
        let prompt = panel_prompt(id, total, entry, outline);
        let label = format!("panel {id} content");
        let raw = run_with_backoff(&self.config.retry_policy(), &label, || {
            self.text.generate_text(&prompt, PANEL_TEMPERATURE)
        })
        .await?;
        parse_panel_content(&raw)
    }

    /// `Ok(None)` when the model answered without usable image bytes.
    async fn panel_image(&self, prompt: &str) -> Result<Option<String>> {
        let policy = self
            .config
            .retry_policy()
            .with_attempts(self.config.image_attempts);
        let envelope = run_with_backoff(&policy, "panel image", || {
            self.images.generate_image(prompt, IMAGE_TEMPERATURE)
        })
        .await?;

        inline_image_uri(&envelope)
    }
}

/// Data URI for the envelope's inline image. `Ok(None)` when the model sent
/// no image; a payload that is present but undecodable is malformed.
fn inline_image_uri(envelope: &Value) -> Result<Option<String>> {
    let Some(b64) = extract_inline_image(envelope) else {
        return Ok(None);
    };
    let bytes = decode_base64_payload(&b64)
        .map_err(|e| GenerationError::MalformedResponse(format!("inline image is not valid base64: {e:#}")))?;
    if bytes.is_empty() {
        return Err(GenerationError::MalformedResponse("inline image is empty".to_string()));
    }
    Ok(Some(image_data_uri(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::CharacterProfile;
    use crate::settings::DEFAULT_PLACEHOLDER_BASE_URL;
    use serde_json::json;

    fn outline() -> StoryOutline {
        StoryOutline {
            title: "Star Peel".into(),
            character: CharacterProfile {
                name: "Hero".into(),
                appearance: "yellow suit".into(),
                ..CharacterProfile::default()
            },
            arc: String::new(),
            panel_outlines: vec![PanelOutline {
                panel_number: 1,
                purpose: "Setup/Introduction".into(),
                key_action: "Hero boards the rocket".into(),
                character_state: "excited".into(),
                setting_description: "a launch pad".into(),
                transition_to: String::new(),
            }],
        }
    }

    #[test]
    fn placeholder_encodes_panel_number_and_label() {
        let url = placeholder_url(DEFAULT_PLACEHOLDER_BASE_URL, 3, "Setup/Introduction");
        assert_eq!(
            url,
            "https://via.placeholder.com/600x400/7C3AED/FFFFFF?text=Panel+3+-+Setup%2FIntroduction"
        );
    }

    #[test]
    fn bare_string_dialogue_becomes_a_list() {
        let o = outline();
        let panel = normalize_panel(1, &json!({ "dialogue": "We have liftoff!" }), &o.panel_outlines[0], "x".into());
        assert_eq!(panel.dialogue, vec!["We have liftoff!"]);
        assert!(panel.visual_elements.is_empty());
        assert_eq!(panel.character_emotions, "determined");
        assert_eq!(panel.image_description, "Panel 1 visual description");
    }

    #[test]
    fn missing_dialogue_is_derived_from_key_action() {
        let o = outline();
        let panel = normalize_panel(1, &json!({ "dialogue": [] }), &o.panel_outlines[0], "x".into());
        assert_eq!(panel.dialogue, vec!["\"Hero boards the rocket.\""]);
    }

    #[test]
    fn fallback_panel_repeats_appearance() {
        let o = outline();
        let panel = synthesize_fallback_panel(1, &o.panel_outlines[0], &o, DEFAULT_PLACEHOLDER_BASE_URL);
        assert_eq!(
            panel.image_description,
            "Panel 1: Hero (detailed appearance: yellow suit) Hero boards the rocket in a launch pad"
        );
        assert_eq!(panel.continuity_notes, "Maintains Hero's consistent appearance: yellow suit");
        assert_eq!(panel.visual_elements.len(), 4);
        assert!(panel.image_url.contains("Panel+1"));
        assert!(!panel.has_inline_image());
    }

    #[test]
    fn speech_text_joins_narration_and_dialogue() {
        let o = outline();
        let mut panel = synthesize_fallback_panel(1, &o.panel_outlines[0], &o, DEFAULT_PLACEHOLDER_BASE_URL);
        panel.narration = "It begins.".into();
        panel.dialogue = vec!["Go!".into(), "Now!".into()];
        assert_eq!(panel.speech_text(), "It begins. Go! Now!");
        panel.narration.clear();
        panel.dialogue.clear();
        assert_eq!(panel.speech_text(), "");
    }

    #[test]
    fn non_object_content_is_malformed() {
        assert!(parse_panel_content("[1, 2]").is_err());
        assert!(parse_panel_content("```json\n{\"narration\": \"n\"}\n```").is_ok());
    }

    #[test]
    fn inline_image_payloads_are_told_apart() {
        let with_data = |data: &str| {
            json!({ "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": data } }
            ] } }] })
        };

        let uri = inline_image_uri(&with_data("iVBORw0KGgoAAAANSUhEUg==")).unwrap();
        assert!(uri.unwrap().starts_with("data:image/png;base64,"));

        let missing = json!({ "candidates": [{ "content": { "parts": [{ "text": "no" }] } }] });
        assert_eq!(inline_image_uri(&missing).unwrap(), None);

        let err = inline_image_uri(&with_data("%%% not base64 %%%")).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn image_prompt_carries_sequence_position() {
        let o = outline();
        let panel = synthesize_fallback_panel(1, &o.panel_outlines[0], &o, DEFAULT_PLACEHOLDER_BASE_URL);
        let prompt = image_prompt(1, 4, &panel, &o.panel_outlines[0], &o, "manga");
        assert!(prompt.contains("Panel 1 of 4 in sequence"));
        assert!(prompt.contains("STYLE: manga"));
        assert!(prompt.contains("APPEARANCE: yellow suit"));
    }
}
