use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use crate::voice::{OutputFormat, VoiceType};

#[derive(Parser, Debug)]
#[command(name = "panelsmith", version, about = "Turn a story idea into a narrated comic")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a comic and print the response JSON.
    Generate(GenerateArgs),
    /// Synthesize narration for a piece of text.
    Narrate(NarrateArgs),
    /// List narration voices, languages and limits.
    Voices(VoicesArgs),
    /// Show recent comic requests, newest first.
    History,
    /// Store provider API keys.
    Keys(KeysArgs),
    /// Toggle the advisory pro flag.
    Pro(ProArgs),
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// The story idea.
    #[arg(long)]
    pub idea: String,

    #[arg(long)]
    pub character: Option<String>,

    /// Art style, e.g. "manga".
    #[arg(long)]
    pub style: Option<String>,

    #[arg(long)]
    pub mood: Option<String>,

    /// Number of panels.
    #[arg(long)]
    pub panels: Option<u32>,

    /// Character trait; repeat for several.
    #[arg(long = "trait")]
    pub traits: Vec<String>,

    /// Allow up to 12 panels.
    #[arg(long, default_value_t = false)]
    pub extended: bool,

    /// Narrate every panel after generation.
    #[arg(long, default_value_t = false)]
    pub narrate: bool,

    #[arg(long, value_parser = parse_voice, default_value = "narrative")]
    pub voice: VoiceType,

    /// Export comic.json, images and audio into this directory.
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub gemini_key: Option<String>,

    #[arg(long)]
    pub elevenlabs_key: Option<String>,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("input").required(true).args(["text", "file"])))]
pub struct NarrateArgs {
    #[arg(long)]
    pub text: Option<String>,

    /// Read the text from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,

    #[arg(long, value_parser = parse_voice, default_value = "narrative")]
    pub voice: VoiceType,

    /// Override the preset's voice id.
    #[arg(long)]
    pub voice_id: Option<String>,

    #[arg(long)]
    pub speed: Option<f64>,

    #[arg(long, value_parser = parse_format, default_value = "mp3")]
    pub format: OutputFormat,

    /// ISO language code.
    #[arg(long, default_value = "en")]
    pub language: String,

    #[arg(long, default_value_t = false)]
    pub ssml: bool,

    /// Send the text as-is.
    #[arg(long, default_value_t = false)]
    pub no_enhance: bool,

    #[arg(long, default_value_t = false)]
    pub streaming: bool,

    /// Write the decoded audio here instead of printing a data URI.
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub elevenlabs_key: Option<String>,
}

#[derive(Parser, Debug)]
pub struct VoicesArgs {
    /// Also fetch the account's custom voices.
    #[arg(long, default_value_t = false)]
    pub custom: bool,

    #[arg(long)]
    pub elevenlabs_key: Option<String>,
}

#[derive(Parser, Debug)]
pub struct KeysArgs {
    #[arg(long)]
    pub gemini: Option<String>,

    #[arg(long)]
    pub elevenlabs: Option<String>,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("toggle").required(true).args(["enable", "disable"])))]
pub struct ProArgs {
    #[arg(long)]
    pub enable: bool,

    #[arg(long)]
    pub disable: bool,
}

fn parse_voice(s: &str) -> Result<VoiceType, String> {
    s.parse().map_err(|e: crate::error::GenerationError| e.to_string())
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse().map_err(|e: crate::error::GenerationError| e.to_string())
}
