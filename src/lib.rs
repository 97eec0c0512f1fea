pub mod chunker;
pub mod cli;
pub mod comic;
pub mod elevenlabs;
pub mod error;
pub mod export;
pub mod gemini;
pub mod history;
pub mod logging;
pub mod narration;
pub mod pacing;
pub mod panels;
pub mod retry;
pub mod sanitize;
pub mod settings;
pub mod speech_text;
pub mod store;
pub mod story;
pub mod utils;
pub mod voice;

#[cfg(test)]
mod test_support;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, warn};

use crate::cli::{Cli, Command, GenerateArgs, KeysArgs, NarrateArgs, ProArgs, VoicesArgs};
use crate::comic::{ComicGenerator, ComicRequest, ComicResponse};
use crate::elevenlabs::ElevenLabsClient;
use crate::error::GenerationError;
use crate::export::{decode_base64_payload, export_comic};
use crate::gemini::GeminiClient;
use crate::narration::{NarrationPipeline, NarrationRequest, Narrator, VoiceCatalogue};
use crate::settings::{load_settings_from_dir, save_settings_to_dir, settings_path, PipelineProfile, Settings};
use crate::store::{resolve_api_key, FileStore, KeyValueStore, ELEVENLABS_API_KEY, GEMINI_API_KEY};
use crate::utils::{ensure_data_dir, store_path};

// ===== Commands =====

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_generate(args: GenerateArgs, settings: &Settings, store: &dyn KeyValueStore) -> Result<bool> {
    let mut config = settings.pipeline_config();
    if args.extended {
        config.max_panels = config.max_panels.max(PipelineProfile::Extended.config().max_panels);
    }

    let request = ComicRequest {
        story_idea: args.idea,
        character_name: args.character,
        art_style: args.style,
        mood: args.mood,
        panels: args.panels,
        character_traits: args.traits,
    };
    if let Err(e) = request.validate(&config) {
        print_json(&ComicResponse::failure(&e, 0, settings.dev_mode))?;
        return Ok(false);
    }

    let client = resolve_api_key(args.gemini_key.as_deref(), store, GEMINI_API_KEY)?
        .ok_or(GenerationError::MissingApiKey("Gemini"))
        .and_then(|key| GeminiClient::new(key, &config));
    let client = match client {
        Ok(c) => c,
        Err(e) => {
            print_json(&ComicResponse::failure(&e, 0, settings.dev_mode))?;
            return Ok(false);
        }
    };

    history::record_request(store, &request)?;
    let usage = history::bump_usage(store)?;
    if usage.over_limit {
        warn!(
            count = usage.usage.count,
            limit = history::FREE_DAILY_LIMIT,
            "free daily comic allowance exceeded; enable pro to lift the limit"
        );
    }

    let generator = ComicGenerator::new(&client, &client, &config, settings.dev_mode);
    let mut response = generator.generate(&request).await;

    if args.narrate {
        if let Some(comic) = response.comic.as_mut() {
            let narrated = match resolve_api_key(args.elevenlabs_key.as_deref(), store, ELEVENLABS_API_KEY)? {
                Some(key) => match ElevenLabsClient::new(key, &settings.narration) {
                    Ok(speech) => {
                        let pipeline = NarrationPipeline::new(&speech, &settings.narration);
                        let outcome = pipeline
                            .attach_narration(std::mem::take(&mut comic.panels), args.voice)
                            .await;
                        comic.panels = outcome.panels;
                        outcome.success_count
                    }
                    Err(e) => {
                        warn!(error = %e, "speech client unavailable");
                        0
                    }
                },
                None => {
                    warn!("ElevenLabs API key not set");
                    0
                }
            };
            if narrated == 0 {
                eprintln!("comic ready, narration unavailable");
            } else {
                eprintln!("narrated {narrated} of {} panels", comic.panels.len());
            }
        }
    }

    if let (Some(out), Some(comic)) = (args.out.as_deref(), response.comic.as_ref()) {
        let summary = export_comic(out, comic).await?;
        eprintln!("wrote {}", summary.comic_json.display());
    }

    print_json(&response)?;
    Ok(response.success)
}

async fn cmd_narrate(args: NarrateArgs, settings: &Settings, store: &dyn KeyValueStore) -> Result<bool> {
    let text = match (args.text, args.file.as_deref()) {
        (Some(t), _) => t,
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read {}", path.display()))?,
        (None, None) => bail!("either --text or --file is required"),
    };

    let key = resolve_api_key(args.elevenlabs_key.as_deref(), store, ELEVENLABS_API_KEY)?
        .ok_or(GenerationError::MissingApiKey("ElevenLabs"))?;
    let speech = ElevenLabsClient::new(key, &settings.narration)?;
    let narrator = Narrator::new(&speech, &settings.narration);

    let req = NarrationRequest {
        text,
        voice_type: Some(args.voice.as_str().to_string()),
        speed: args.speed,
        voice_id: args.voice_id,
        language: Some(args.language),
        output_format: Some(args.format.as_str().to_string()),
        enable_ssml: args.ssml,
        optimize_for_streaming: args.streaming,
        enhance_text: Some(!args.no_enhance),
        ..NarrationRequest::default()
    };
    let mut result = narrator.narrate(&req).await?;

    if let Some(out) = args.out {
        let bytes = decode_base64_payload(&result.audio_url)?;
        tokio::fs::write(&out, bytes)
            .await
            .with_context(|| format!("write {}", out.display()))?;
        info!(path = %out.display(), "narration saved");
        result.audio_url = out.display().to_string();
    }
    print_json(&result)?;
    Ok(true)
}

async fn cmd_voices(args: VoicesArgs, settings: &Settings, store: &dyn KeyValueStore) -> Result<bool> {
    let mut custom = Vec::new();
    if args.custom {
        match resolve_api_key(args.elevenlabs_key.as_deref(), store, ELEVENLABS_API_KEY)? {
            Some(key) => custom = ElevenLabsClient::new(key, &settings.narration)?.list_voices().await,
            None => warn!("ElevenLabs API key not set, skipping custom voices"),
        }
    }
    print_json(&VoiceCatalogue::new(&settings.narration, custom))?;
    Ok(true)
}

fn cmd_keys(args: KeysArgs, store: &dyn KeyValueStore) -> Result<bool> {
    if args.gemini.is_none() && args.elevenlabs.is_none() {
        bail!("pass --gemini and/or --elevenlabs");
    }
    if let Some(k) = args.gemini {
        store.set(GEMINI_API_KEY, k.trim())?;
        eprintln!("stored {GEMINI_API_KEY}");
    }
    if let Some(k) = args.elevenlabs {
        store.set(ELEVENLABS_API_KEY, k.trim())?;
        eprintln!("stored {ELEVENLABS_API_KEY}");
    }
    Ok(true)
}

fn cmd_pro(args: ProArgs, store: &dyn KeyValueStore) -> Result<bool> {
    let enabled = args.enable && !args.disable;
    history::set_pro(store, enabled)?;
    eprintln!("pro {}", if enabled { "enabled" } else { "disabled" });
    Ok(true)
}

async fn dispatch(cmd: Command, data_dir: &Path) -> Result<bool> {
    let settings = load_settings_from_dir(data_dir);
    if !settings_path(data_dir).exists() {
        // first run: leave an editable copy of the defaults behind
        save_settings_to_dir(data_dir, &settings)?;
    }
    let store = FileStore::new(store_path(data_dir));
    match cmd {
        Command::Generate(args) => cmd_generate(args, &settings, &store).await,
        Command::Narrate(args) => cmd_narrate(args, &settings, &store).await,
        Command::Voices(args) => cmd_voices(args, &settings, &store).await,
        Command::History => {
            print_json(&history::recent_requests(&store)?)?;
            Ok(true)
        }
        Command::Keys(args) => cmd_keys(args, &store),
        Command::Pro(args) => cmd_pro(args, &store),
    }
}

// ===== Startup =====

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let data_dir = ensure_data_dir()?;
    let _guard = logging::init(&data_dir)?;
    info!(data_dir = %data_dir.display(), "panelsmith starting");

    let rt = tokio::runtime::Runtime::new()?;
    let ok = rt.block_on(dispatch(cli.cmd, &data_dir))?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
