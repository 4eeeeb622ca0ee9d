use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::fetcher::{AUDIO_EXTENSION, ChunkStep, FetchError, ProgressGate, Transfer, TransferRequest};
use crate::resolver::MediaRef;

const PROGRESS_PREFIX: &str = "[progress]";
const PROGRESS_TEMPLATE: &str = "download:[progress] %(progress._percent_str)s";
const STDERR_TAIL: usize = 512;

/// Parses a line printed through [`PROGRESS_TEMPLATE`] into a percentage.
fn parse_progress(line: &str) -> Option<f64> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    rest.trim().strip_suffix('%')?.trim().parse().ok()
}

fn tail(text: &str) -> String {
    let text = text.trim();
    let start = text.len().saturating_sub(STDERR_TAIL);
    let start = (start..text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    text[start..].to_string()
}

/// Output template for `request`; literal `%` in names must not read as a field.
fn output_template(request: &TransferRequest) -> String {
    let stem = request.output_stem.display().to_string().replace('%', "%%");
    format!("{}.%(ext)s", stem)
}

/// Fetches best-available audio with `yt-dlp` and has it transcode to mp3
/// at top quality, embedding cover art and tags.
pub struct YtDlpTransfer {
    binary: PathBuf,
    ffmpeg: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlpTransfer {
    pub fn new(binary: PathBuf, ffmpeg: PathBuf, cookies: Option<PathBuf>) -> Self {
        Self {
            binary,
            ffmpeg,
            cookies,
        }
    }

    fn command(&self, link: &MediaRef, request: &TransferRequest) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["-f", "bestaudio", "--extract-audio"])
            .args(["--audio-format", AUDIO_EXTENSION, "--audio-quality", "0"])
            .args(["--embed-thumbnail", "--embed-metadata"])
            .args(["--no-mtime", "--newline", "--no-playlist"])
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .arg("--ffmpeg-location")
            .arg(&self.ffmpeg)
            .arg("--paths")
            .arg(format!("home:{}", request.download_root.display()))
            .arg("--paths")
            .arg(format!("temp:{}", request.scratch_dir.display()))
            .arg("-o")
            .arg(output_template(request));
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        command
            .arg(link.url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Transfer for YtDlpTransfer {
    async fn transfer(
        &self,
        link: &MediaRef,
        request: &TransferRequest,
        gate: &ProgressGate<'_>,
    ) -> Result<(), FetchError> {
        let mut child = self.command(link, request).spawn().map_err(FetchError::Spawn)?;

        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let Some(percent) = parse_progress(&line) else {
                    debug!("yt-dlp: {}", line);
                    continue;
                };
                if gate.step(percent) == ChunkStep::Abort {
                    warn!("Cancelling transfer of {}", link);
                    child.kill().await?;
                    return Err(FetchError::Cancelled);
                }
            }
        }

        let status = child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(FetchError::Transfer(format!("{}: {}", status, tail(&stderr))))
    }
}
