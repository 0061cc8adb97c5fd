mod cli;
mod config;
mod database;
mod delivery;
mod io;
mod job;
mod logging;
mod my_regex;
mod outside;
mod pipeline;
mod result;
mod server;
mod types;
mod utils;

use std::sync::Arc;

use clap::Parser;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, info};

use crate::{
    cli::Args,
    config::Settings,
    database::{HistoryLog, Sqlite},
    job::ProgressRegistry,
    logging::init_logging,
    outside::{Ffmpeg, Ytdl},
    pipeline::Pipeline,
    server::AppState,
};

fn main() -> Result<()> {
    // Initialize the environment & CLI
    let args = Args::parse();
    let settings = Settings::load(&args)?;

    // The local time offset can only be read before other threads are spawned
    init_logging(settings.log_level)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
        .wrap_err("Could not start the async runtime")?
        .block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    // Make sure the needed directories are created
    std::fs::create_dir_all(&settings.temp_dir)
        .into_diagnostic()
        .wrap_err("Could not create temp directory")?;
    let swept = io::sweep_stale_files(&settings.temp_dir)
        .into_diagnostic()
        .wrap_err("Could not clean the temp directory")?;
    if swept > 0 {
        info!("Deleted {swept} stale temporary file(s)");
    }

    let (ytdl, ffmpeg) = load_external_components(&settings).await?;
    let history = open_history(&settings)?;

    let pipeline = Pipeline::new(Arc::new(ytdl), Arc::new(ffmpeg), ProgressRegistry::new());
    server::serve(AppState::new(pipeline, settings, history)).await
}

/// Load the external components
async fn load_external_components(settings: &Settings) -> Result<(Ytdl, Ffmpeg)> {
    // Probe both programs concurrently as executing an external program
    // is not instantaneous
    let (ytdl, ffmpeg) = tokio::join!(
        Ytdl::new(settings.resolver.clone(), settings.fetch.clone()),
        Ffmpeg::new(settings.mux.clone()),
    );

    let ytdl = ytdl.wrap_err("Could not find a usable yt-dlp or youtube-dl")?;
    let ffmpeg = ffmpeg.wrap_err("Could not find a usable ffmpeg")?;
    debug!("Resolving with {}", ytdl.program());

    Ok((ytdl, ffmpeg))
}

fn open_history(settings: &Settings) -> Result<Option<Arc<dyn HistoryLog>>> {
    let Some(path) = &settings.history_db else {
        info!("No history database configured");
        return Ok(None);
    };

    if let Some(p) = path.parent() {
        std::fs::create_dir_all(p)
            .into_diagnostic()
            .wrap_err("Could not create history parent directories")?;
    }
    let db = Sqlite::read_or_create(path).wrap_err("Could not create or read history file")?;
    info!("Recording the downloads in {}", path.display());

    Ok(Some(Arc::new(db)))
}
