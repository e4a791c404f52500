// PodPipe - playlist maintenance from the terminal
// Thin shell over the library: every command is one coordinator call

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use podpipe::{
    config::{Config, LoggingConfig},
    playlist::{ChannelListener, PlaylistCoordinator, PlaylistStore},
    EpisodeId, PlaylistEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "podpipe")]
#[command(about = "Inspect and reorder the podcast playlist")]
struct Args {
    /// Use this config file instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the playlist database from the config
    #[arg(long)]
    database: Option<PathBuf>,

    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the playlist in order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Add an episode at the end
    Append { episode: i64 },
    /// Add an episode at the front
    Prepend { episode: i64 },
    /// Remove whatever sits at a position
    Remove { position: usize },
    /// Move the entry at FROM so it ends up at TO
    Move { from: usize, to: usize },
    /// Empty the playlist
    Clear,
    /// Act as if the episode was deleted from the library
    Forget { episode: i64 },
    /// Verify positions are gap-free
    Check,
}

fn init_logging(config: &LoggingConfig, dev: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.directory)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&config.directory, "podpipe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(filter);

    // Dev mode mirrors everything to stderr as well
    if dev {
        let subscriber = builder
            .with_writer(file_writer.and(std::io::stderr))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_writer(file_writer).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(database) = args.database.clone() {
        config.database_path = database;
    }

    let _guard = init_logging(&config.logging, args.dev)?;
    debug!("Using playlist database {}", config.database_path.display());

    let store = Arc::new(PlaylistStore::open(&config.database_path)?);
    let playlist = PlaylistCoordinator::new(store);

    let (listener, mut events) = ChannelListener::new();
    playlist.add_listener(listener);

    run(&playlist, args.command)?;

    while let Ok(event) = events.try_recv() {
        println!("{}", describe(event));
    }

    Ok(())
}

fn run(playlist: &PlaylistCoordinator, command: Command) -> Result<()> {
    match command {
        Command::List { json } => {
            let entries = playlist.entries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Playlist is empty");
            } else {
                for entry in entries {
                    println!("{:>4}  {}", entry.position, entry.episode_id);
                }
            }
        }
        Command::Append { episode } => {
            playlist.append_end(EpisodeId(episode))?;
        }
        Command::Prepend { episode } => {
            playlist.prepend_start(EpisodeId(episode))?;
        }
        Command::Remove { position } => {
            if !playlist.remove_at(position)? {
                bail!("Nothing at position {}", position);
            }
        }
        Command::Move { from, to } => {
            if !playlist.move_to(from, to)? {
                bail!("Cannot move {} -> {} (playlist has {} entries)", from, to, playlist.len()?);
            }
        }
        Command::Clear => {
            let removed = playlist.clear()?;
            info!("Cleared {} entries from the CLI", removed);
        }
        Command::Forget { episode } => {
            let removed = playlist.on_entity_deleted_externally(EpisodeId(episode))?;
            println!("{} occurrence(s) removed", removed);
        }
        Command::Check => {
            if playlist.is_contiguous()? {
                println!("OK: {} entries, positions contiguous", playlist.len()?);
            } else {
                bail!("Playlist positions have gaps or duplicates");
            }
        }
    }
    Ok(())
}

fn describe(event: PlaylistEvent) -> String {
    match event {
        PlaylistEvent::Added { position, episode_id } => format!("+ {} at {}", episode_id, position),
        PlaylistEvent::Removed { position } => format!("- position {}", position),
        PlaylistEvent::Moved { from, to } => format!("~ {} -> {}", from, to),
    }
}
