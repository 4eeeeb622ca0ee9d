use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod alias;
mod cli;
mod config;
mod downloader;
mod monitor;
mod resolver;
mod server;
mod track;
mod utils;

use alias::AliasStore;
use config::{EngineArgs, RuntimeSettings};
use downloader::{Fetcher, QueueEngine, YtDlpTransfer};
use resolver::Resolver;
use resolver::search::YtDlpSearch;
use track::RunStatus;

#[derive(Parser)]
#[command(name = "spottube")]
#[command(about = "Finds tracks on YouTube Music and downloads them as tagged mp3 files")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Serve {
        #[arg(long, help = "Address to bind to", default_value = "0.0.0.0")]
        address: String,
        #[arg(short, long, env = "PORT", default_value_t = 5000)]
        port: u16,
        #[command(flatten)]
        engine: EngineArgs,
    },
    Fetch {
        #[arg(short, long, help = "JSON array of track descriptors")]
        tracks: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http={}",
            env!("CARGO_PKG_NAME"),
            level,
            level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(
    args: &EngineArgs,
) -> Result<(QueueEngine, Arc<AliasStore>, watch::Sender<RuntimeSettings>)> {
    let aliases = Arc::new(AliasStore::new());
    aliases.load_file(&args.alias_file())?;

    let cookies = args.cookies();
    let search = Arc::new(YtDlpSearch::new(args.yt_dlp_path.clone(), cookies.clone()));
    let transfer = Arc::new(YtDlpTransfer::new(
        args.yt_dlp_path.clone(),
        args.ffmpeg_path.clone(),
        cookies,
    ));

    let (settings_tx, settings_rx) = watch::channel(args.runtime_settings());
    let resolver = Resolver::new(search, aliases.clone(), args.ignored_keywords.clone());
    let fetcher = Fetcher::new(transfer, args.download_folder.clone(), settings_rx);
    let engine = QueueEngine::new(resolver, fetcher, usize::try_from(args.thread_limit)?);
    Ok((engine, aliases, settings_tx))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level);

    match args.command {
        Some(Commands::Serve {
            address,
            port,
            engine,
        }) => {
            let (engine, aliases, settings) = build_engine(&engine)?;
            server::startup(engine, aliases, settings, address, port).await?;
        }

        Some(Commands::Fetch { tracks, engine }) => {
            let tracks = cli::load_tracks(&tracks)?;
            let (engine, _aliases, _settings) = build_engine(&engine)?;
            let snapshot = cli::fetch(engine, tracks, cli::progress_bar()?).await?;
            println!("{}", cli::summary(&snapshot));
            if snapshot.status == RunStatus::Error {
                bail!("run ended in error");
            }
        }

        None => {
            println!("Use --help for available commands");
        }
    }

    Ok(())
}
