use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "panelsmith", "panelsmith")
        .ok_or_else(|| anyhow!("cannot resolve project dirs"))
}

/// `PANELSMITH_DATA_DIR` when set, otherwise the platform data directory.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let data_dir = match std::env::var_os("PANELSMITH_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => app_dirs()?.data_dir().to_path_buf(),
    };
    fs::create_dir_all(&data_dir).context("create data dir")?;
    Ok(data_dir)
}

pub fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join("store.json")
}

pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}
