use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{GenerationError, Result};
use crate::gemini::TextGenerator;
use crate::retry::{run_with_backoff, RetryPolicy};
use crate::sanitize::sanitize;

const OUTLINE_TEMPERATURE: f32 = 0.8;
const DEFAULT_TRAITS: &str = "determined, resourceful";

/// Model output is loose about scalar types: `null` reads as empty and
/// numbers or booleans are kept as their JSON text.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Any value is accepted; panel numbers are rewritten by position anyway.
fn lenient_panel_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterProfile {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    /// Repeated verbatim in every image prompt; the only cross-panel
    /// consistency signal the image model gets.
    #[serde(deserialize_with = "lenient_string")]
    pub appearance: String,
    #[serde(deserialize_with = "lenient_string")]
    pub personality: String,
    #[serde(deserialize_with = "lenient_string")]
    pub backstory: String,
    #[serde(deserialize_with = "lenient_string")]
    pub motivation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PanelOutline {
    #[serde(deserialize_with = "lenient_panel_number")]
    pub panel_number: u32,
    #[serde(deserialize_with = "lenient_string")]
    pub purpose: String,
    #[serde(deserialize_with = "lenient_string")]
    pub key_action: String,
    #[serde(deserialize_with = "lenient_string")]
    pub character_state: String,
    #[serde(deserialize_with = "lenient_string")]
    pub setting_description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub transition_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryOutline {
    pub title: String,
    pub character: CharacterProfile,
    pub arc: String,
    pub panel_outlines: Vec<PanelOutline>,
}

/// A validated comic request with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryBrief {
    pub story_idea: String,
    pub character_name: String,
    pub art_style: String,
    pub mood: String,
    pub panels: u32,
    pub character_traits: Vec<String>,
}

impl StoryBrief {
    fn traits_or(&self, default: &str) -> String {
        if self.character_traits.is_empty() {
            default.to_string()
        } else {
            self.character_traits.join(", ")
        }
    }
}

pub fn outline_prompt(brief: &StoryBrief) -> String {
    let skeleton = (1..=brief.panels)
        .map(|n| {
            format!(
                r#"    {{
      "panelNumber": {n},
      "purpose": "Story beat for panel {n}",
      "keyAction": "Specific visual action happening in this panel",
      "characterState": "Character's emotional/physical state for image generation",
      "settingDescription": "DETAILED scene description for image generation",
      "transitionTo": "How this connects to next panel"
    }}"#
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"Create a detailed comic book story structure with consistent character development.

STORY CONCEPT: {idea}
CHARACTER NAME: {name}
ART STYLE: {style}
MOOD: {mood}
NUMBER OF PANELS: {panels}
CHARACTER TRAITS: {traits}

Respond with ONLY valid JSON, with exactly {panels} entries in "panelOutlines", using this structure:
{{
  "title": "Creative title for the comic",
  "character": {{
    "name": "{name}",
    "appearance": "DETAILED physical description for consistent image generation - include clothing, hair, facial features, body type, distinctive marks",
    "personality": "Key personality traits and mannerisms",
    "backstory": "Brief background that motivates their actions",
    "motivation": "What drives them in this specific story"
  }},
  "arc": "Overall story progression and character development",
  "panelOutlines": [
{skeleton}
  ]
}}"#,
        idea = brief.story_idea,
        name = brief.character_name,
        style = brief.art_style,
        mood = brief.mood,
        panels = brief.panels,
        traits = brief.traits_or(DEFAULT_TRAITS),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutline {
    title: Option<String>,
    character: Option<CharacterProfile>,
    #[serde(default, deserialize_with = "lenient_string")]
    arc: String,
    panel_outlines: Option<Vec<PanelOutline>>,
}

/// Parse and validate a model response. Panel numbers are rewritten to the
/// 1-based position of each entry.
pub fn parse_outline(raw: &str, expected_panels: u32) -> Result<StoryOutline> {
    let cleaned = sanitize(raw);
    let parsed: RawOutline = serde_json::from_str(&cleaned)
        .map_err(|e| GenerationError::MalformedResponse(format!("outline is not valid JSON: {e}")))?;

    let title = parsed
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| GenerationError::MalformedResponse("outline has no title".into()))?;
    let character = parsed
        .character
        .ok_or_else(|| GenerationError::MalformedResponse("outline has no character".into()))?;
    let mut panel_outlines = parsed
        .panel_outlines
        .ok_or_else(|| GenerationError::MalformedResponse("outline has no panelOutlines".into()))?;

    if panel_outlines.len() != expected_panels as usize {
        return Err(GenerationError::MalformedResponse(format!(
            "expected {expected_panels} panel outlines, got {}",
            panel_outlines.len()
        )));
    }
    for (i, p) in panel_outlines.iter_mut().enumerate() {
        p.panel_number = i as u32 + 1;
    }

    Ok(StoryOutline {
        title,
        character,
        arc: parsed.arc,
        panel_outlines,
    })
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Network-free outline built from the brief alone.
///
/// Panels are bucketed by story progress `i / max(n - 1, 1)` into setup
/// (<= 0.25), rising action (<= 0.75) and resolution.
pub fn synthesize_fallback_outline(brief: &StoryBrief) -> StoryOutline {
    let name = &brief.character_name;
    let idea = &brief.story_idea;
    let n = brief.panels;
    let span = n.saturating_sub(1).max(1) as f64;

    let panel_outlines = (0..n)
        .map(|i| {
            let progress = i as f64 / span;
            let (purpose, key_action, character_state) = if progress <= 0.25 {
                (
                    "Setup/Introduction",
                    format!("Introduce {name} and establish the world of {idea}"),
                    "curious and ready for adventure",
                )
            } else if progress <= 0.75 {
                (
                    "Rising Action/Challenge",
                    format!("{name} faces obstacles related to {idea}"),
                    "determined but challenged",
                )
            } else {
                (
                    "Climax/Resolution",
                    format!("{name} overcomes challenges and achieves their goal"),
                    "triumphant and transformed",
                )
            };
            PanelOutline {
                panel_number: i + 1,
                purpose: purpose.to_string(),
                key_action,
                character_state: character_state.to_string(),
                setting_description: format!(
                    "A {} setting appropriate for {idea} with detailed visual elements",
                    brief.mood
                ),
                transition_to: if i + 1 < n {
                    "Builds toward next panel".to_string()
                } else {
                    "Story concludes".to_string()
                },
            }
        })
        .collect();

    StoryOutline {
        title: format!("{name} and the {}", title_case(idea)),
        character: CharacterProfile {
            name: name.clone(),
            appearance: format!(
                "{name} has distinctive features that remain constant across all panels: \
                 specific hair color and style, facial features, clothing style, body type \
                 and unique characteristics"
            ),
            personality: brief.traits_or("brave, determined, resourceful"),
            backstory: format!("A hero ready for the {idea} adventure"),
            motivation: "To successfully complete their quest".to_string(),
        },
        arc: format!("A {} journey of growth and triumph", brief.mood),
        panel_outlines,
    }
}

/// Outline stage of the pipeline. Never fails: every upstream or parse
/// failure ends in [`synthesize_fallback_outline`].
pub struct StoryStructureGenerator<'a> {
    text: &'a dyn TextGenerator,
    retry: RetryPolicy,
}

impl<'a> StoryStructureGenerator<'a> {
    pub fn new(text: &'a dyn TextGenerator, retry: RetryPolicy) -> Self {
        Self { text, retry }
    }

    #[instrument(skip(self, brief), fields(panels = brief.panels, character = %brief.character_name))]
    pub async fn build_outline(&self, brief: &StoryBrief) -> StoryOutline {
        let prompt = outline_prompt(brief);
        let result = run_with_backoff(&self.retry, "story structure", || {
            self.text.generate_text(&prompt, OUTLINE_TEMPERATURE)
        })
        .await
        .and_then(|raw| parse_outline(&raw, brief.panels));

        match result {
            Ok(mut outline) => {
                if outline.character.name.trim().is_empty() {
                    outline.character.name = brief.character_name.clone();
                }
                info!(title = %outline.title, "story structure generated");
                outline
            }
            Err(e) => {
                warn!(error = %e, "story structure unavailable, using fallback outline");
                synthesize_fallback_outline(brief)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(panels: u32) -> StoryBrief {
        StoryBrief {
            story_idea: "A banana astronaut explores space".to_string(),
            character_name: "Hero".to_string(),
            art_style: "modern comic book".to_string(),
            mood: "adventurous".to_string(),
            panels,
            character_traits: vec![],
        }
    }

    fn outline_json(count: usize) -> String {
        let panels: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"panelNumber": {}, "keyAction": "action {i}"}}"#, i + 7))
            .collect();
        format!(
            r#"```json
{{"title": "Star Peel", "character": {{"name": "Hero", "appearance": "yellow suit"}}, "arc": "up", "panelOutlines": [{}]}}
```"#,
            panels.join(",")
        )
    }

    #[test]
    fn prompt_contains_one_skeleton_block_per_panel() {
        let prompt = outline_prompt(&brief(3));
        assert_eq!(prompt.matches("\"panelNumber\"").count(), 3);
        assert!(prompt.contains("\"panelNumber\": 3"));
        assert!(prompt.contains("CHARACTER TRAITS: determined, resourceful"));
    }

    #[test]
    fn parses_and_renumbers() {
        let outline = parse_outline(&outline_json(3), 3).unwrap();
        assert_eq!(outline.title, "Star Peel");
        let numbers: Vec<u32> = outline.panel_outlines.iter().map(|p| p.panel_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(outline.panel_outlines[2].key_action, "action 2");
    }

    #[test]
    fn wrong_panel_count_is_malformed() {
        let err = parse_outline(&outline_json(2), 3).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn string_panel_numbers_are_accepted() {
        let raw = r#"{"title": "Peel", "character": {"name": "Peel"}, "panelOutlines": [
            {"panelNumber": "1", "keyAction": "launch"},
            {"panelNumber": "two", "keyAction": "land"}
        ]}"#;
        let outline = parse_outline(raw, 2).unwrap();
        assert_eq!(outline.title, "Peel");
        assert_eq!(outline.panel_outlines[0].panel_number, 1);
        assert_eq!(outline.panel_outlines[1].panel_number, 2);
        assert_eq!(outline.panel_outlines[1].key_action, "land");
    }

    #[test]
    fn null_and_numeric_strings_are_tolerated() {
        let raw = r#"{"title": "Peel", "arc": null,
            "character": {"name": "Peel", "appearance": null, "motivation": 42},
            "panelOutlines": [
                {"panelNumber": 1, "purpose": "Setup", "transitionTo": null},
                {"panelNumber": null, "keyAction": "land", "settingDescription": null}
            ]}"#;
        let outline = parse_outline(raw, 2).unwrap();
        assert_eq!(outline.arc, "");
        assert_eq!(outline.character.appearance, "");
        assert_eq!(outline.character.motivation, "42");
        assert_eq!(outline.panel_outlines[0].transition_to, "");
        assert_eq!(outline.panel_outlines[1].setting_description, "");
        assert_eq!(outline.panel_outlines[1].panel_number, 2);
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(parse_outline(r#"{"character": {}, "panelOutlines": []}"#, 0).is_err());
        assert!(parse_outline(r#"{"title": "T", "panelOutlines": []}"#, 0).is_err());
        assert!(parse_outline("not json at all", 2).is_err());
    }

    #[test]
    fn fallback_buckets_follow_story_progress() {
        let outline = synthesize_fallback_outline(&brief(4));
        assert_eq!(outline.panel_outlines.len(), 4);
        assert!(outline.panel_outlines[0].key_action.contains("Introduce"));
        assert_eq!(outline.panel_outlines[1].character_state, "determined but challenged");
        assert_eq!(outline.panel_outlines[2].character_state, "determined but challenged");
        assert_eq!(outline.panel_outlines[3].character_state, "triumphant and transformed");
        assert_eq!(outline.panel_outlines[3].transition_to, "Story concludes");
        assert_eq!(outline.title, "Hero and the A Banana Astronaut Explores Space");
    }

    #[test]
    fn fallback_for_two_panels_has_setup_and_resolution() {
        let outline = synthesize_fallback_outline(&brief(2));
        assert_eq!(outline.panel_outlines[0].purpose, "Setup/Introduction");
        assert_eq!(outline.panel_outlines[1].purpose, "Climax/Resolution");
    }

    #[test]
    fn fallback_uses_traits_when_given() {
        let mut b = brief(2);
        b.character_traits = vec!["witty".into(), "bold".into()];
        assert_eq!(synthesize_fallback_outline(&b).character.personality, "witty, bold");
    }
}
