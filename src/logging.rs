use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::logs_dir;

/// Stderr output filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file under `<data_dir>/logs`. Keep the guard alive until exit or
/// buffered file lines are lost.
pub fn init(data_dir: &Path) -> Result<WorkerGuard> {
    let dir = logs_dir(data_dir);
    std::fs::create_dir_all(&dir).context("create logs dir")?;

    let appender = tracing_appender::rolling::daily(&dir, "panelsmith.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}
