use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::{Result, eyre::WrapErr};
use multiloop::{Config, Session, audio, persist, wav};

mod console;

#[derive(Parser, Debug)]
#[command(version, about = "A multi-track looper for JACK")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session file, restored on start (if it exists) and written on quit
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Where log records go, the terminal belongs to the UI
    #[arg(long, default_value = "multiloop.log")]
    log_file: PathBuf,

    /// Export one cycle of every track as WAV into this directory on quit
    #[arg(short, long)]
    export_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let restore = match &args.state {
        Some(path) if path.exists() => Some(persist::load(path)?),
        _ => None,
    };

    let (client, audio_state) = audio::audio_setup(config, restore.as_ref())?;
    let sample_rate = audio_state.sample_rate;

    let terminal = ratatui::init();
    let result = console::run(terminal, audio_state).await;
    ratatui::restore();

    let (_client, _notifications, processor) = client.deactivate()?;
    let session = processor.into_session();
    if let Some(path) = &args.state {
        persist::save(path, &session.to_state())?;
    }
    if let Some(dir) = &args.export_dir {
        export_tracks(&session, sample_rate, dir)?;
    }
    result
}

fn init_logging(path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn export_tracks(session: &Session, sample_rate: u32, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("cannot create export directory {}", dir.display()))?;
    for track in session.tracks() {
        let path = dir.join(format!("track_{}.wav", track.id() + 1));
        if !wav::export_track_cycle(track, sample_rate, &path)? {
            log::info!("{} has nothing to export", track.name());
        }
    }
    Ok(())
}
