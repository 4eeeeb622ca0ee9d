use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ALIAS_FILE: &str = "aliases.json";
const COOKIES_FILE: &str = "cookies.txt";

/// Options shared by every subcommand that runs the download engine.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(long, env = "DOWNLOAD_FOLDER", default_value = "downloads")]
    pub download_folder: PathBuf,

    #[arg(
        long,
        env = "THREAD_LIMIT",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Tracks processed concurrently"
    )]
    pub thread_limit: u64,

    #[arg(
        long,
        env = "SLEEP_INTERVAL",
        default_value_t = 0,
        help = "Cooldown in seconds after each downloaded track"
    )]
    pub sleep_interval: u64,

    #[arg(long, env = "FFMPEG_PATH", default_value = "/usr/bin/ffmpeg")]
    pub ffmpeg_path: PathBuf,

    #[arg(long, env = "YT_DLP_PATH", default_value = "yt-dlp")]
    pub yt_dlp_path: PathBuf,

    #[arg(long, env = "COOKIES_PATH")]
    pub cookies_path: Option<PathBuf>,

    #[arg(long, env = "CONFIG_FOLDER", default_value = "config")]
    pub config_folder: PathBuf,

    #[arg(
        long,
        env = "IGNORED_KEYWORDS",
        value_delimiter = ',',
        help = "Skip search results whose title contains any of these"
    )]
    pub ignored_keywords: Vec<String>,
}

impl EngineArgs {
    pub fn alias_file(&self) -> PathBuf {
        self.config_folder.join(ALIAS_FILE)
    }

    /// The explicit cookie file if it exists, else `cookies.txt` in the config folder.
    pub fn cookies(&self) -> Option<PathBuf> {
        self.cookies_path
            .iter()
            .cloned()
            .chain(std::iter::once(self.config_folder.join(COOKIES_FILE)))
            .find(|path| path.is_file())
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            sleep_interval: self.sleep_interval,
        }
    }
}

/// Settings that can change while a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Seconds to wait after each completed download.
    pub sleep_interval: u64,
}
