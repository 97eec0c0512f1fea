use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::comic::ComicStory;

/// Decode a bare base64 payload or the payload part of a data URI.
pub fn decode_base64_payload(s: &str) -> Result<Vec<u8>> {
    let data = match s.find(',') {
        Some(idx) if s.starts_with("data:") => &s[(idx + 1)..],
        _ => s,
    };
    B64.decode(data.trim()).map_err(|e| anyhow!("base64 decode: {e}"))
}

pub fn guess_image_extension(bytes: &[u8]) -> &'static str {
    // PNG
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "jpg";
    }
    // RIFF....WEBP
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "webp";
    }
    "png"
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// `data:<mime>;base64,` URI for raw image bytes, with the mime type sniffed
/// from the bytes.
pub fn image_data_uri(bytes: &[u8]) -> String {
    let mime = mime_for_extension(guess_image_extension(bytes));
    format!("data:{mime};base64,{}", B64.encode(bytes))
}

pub fn audio_data_uri(bytes: &[u8], format: &str) -> String {
    format!("data:audio/{format};base64,{}", B64.encode(bytes))
}

/// Audio extension from a `data:audio/<fmt>;base64,` URI.
fn audio_extension(uri: &str) -> &str {
    uri.strip_prefix("data:audio/")
        .and_then(|rest| rest.split(';').next())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("mp3")
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub comic_json: PathBuf,
    pub images: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
}

/// Write `comic.json` plus every inline panel image and narration track.
///
/// Placeholder images are hosted elsewhere and are not downloaded.
pub async fn export_comic(out_dir: &Path, story: &ComicStory) -> Result<ExportSummary> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("create export dir {}", out_dir.display()))?;

    let mut summary = ExportSummary {
        comic_json: out_dir.join("comic.json"),
        ..ExportSummary::default()
    };
    let json = serde_json::to_vec_pretty(story)?;
    tokio::fs::write(&summary.comic_json, json)
        .await
        .context("write comic.json")?;

    for panel in &story.panels {
        if panel.image_url.starts_with("data:") {
            match decode_base64_payload(&panel.image_url) {
                Ok(bytes) => {
                    let ext = guess_image_extension(&bytes);
                    let path = out_dir.join(format!("panel-{}.{}", panel.id, ext));
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("write {}", path.display()))?;
                    debug!(path = %path.display(), "saved panel image");
                    summary.images.push(path);
                }
                Err(e) => warn!(panel = panel.id, error = %e, "skipping undecodable panel image"),
            }
        }

        if let Some(audio) = panel.audio_url.as_deref().filter(|a| a.starts_with("data:")) {
            let bytes = decode_base64_payload(audio)
                .with_context(|| format!("decode audio of panel {}", panel.id))?;
            let path = out_dir.join(format!("panel-{}.{}", panel.id, audio_extension(audio)));
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("write {}", path.display()))?;
            summary.audio.push(path);
        }
    }

    info!(
        dir = %out_dir.display(),
        images = summary.images.len(),
        audio = summary.audio.len(),
        "comic exported"
    );
    Ok(summary)
}
