use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const MUSIC_SEARCH_URL: &str = "https://music.youtube.com/search?q=";
const TOPIC_SUFFIX: &str = " - Topic";
const VIDEO_EXTRACTOR: &str = "Youtube";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    /// Only catalog songs.
    Songs,
    /// Whatever the service ranks highest, songs or videos.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Song,
    Video,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub video_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub kind: HitKind,
    /// The service marked this hit as its "Top result".
    pub top_result: bool,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to launch search backend: {0}")]
    Spawn(#[source] io::Error),

    #[error("search backend exited with {status}: {stderr}")]
    Backend { status: String, stderr: String },

    #[error("unreadable search response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A remote catalog that can be queried for playable media.
#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filter: SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Searches YouTube Music through the `yt-dlp` executable.
pub struct YtDlpSearch {
    binary: PathBuf,
    cookies: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artists: Option<Vec<String>>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    /// Extractor that would handle the entry; albums, artists and playlists are not `Youtube`.
    #[serde(default)]
    ie_key: Option<String>,
}

impl FlatEntry {
    fn playable(&self) -> bool {
        self.ie_key.as_deref().is_none_or(|key| key == VIDEO_EXTRACTOR)
    }

    /// Catalog songs carry artist credits or come from an auto-generated topic channel.
    fn kind(&self, filter: SearchFilter) -> HitKind {
        let credited = self.artists.as_ref().is_some_and(|a| !a.is_empty());
        let topic = self
            .channel
            .as_ref()
            .or(self.uploader.as_ref())
            .is_some_and(|name| name.ends_with(TOPIC_SUFFIX));
        if filter == SearchFilter::Songs || credited || topic {
            HitKind::Song
        } else {
            HitKind::Video
        }
    }

    fn artists(&self) -> Vec<String> {
        if let Some(artists) = self.artists.as_ref().filter(|a| !a.is_empty()) {
            return artists.clone();
        }
        if let Some(artist) = &self.artist {
            return artist.split(", ").map(str::to_string).collect();
        }
        self.channel
            .as_ref()
            .or(self.uploader.as_ref())
            .map(|name| vec![name.strip_suffix(TOPIC_SUFFIX).unwrap_or(name).to_string()])
            .unwrap_or_default()
    }
}

impl YtDlpSearch {
    pub fn new(binary: PathBuf, cookies: Option<PathBuf>) -> Self {
        Self { binary, cookies }
    }

    fn search_url(query: &str, filter: SearchFilter) -> String {
        let mut url = format!("{}{}", MUSIC_SEARCH_URL, urlencoding::encode(query));
        if filter == SearchFilter::Songs {
            url.push_str("#songs");
        }
        url
    }
}

fn parse_hits(json: &[u8], filter: SearchFilter) -> Result<Vec<SearchHit>, SearchError> {
    let playlist: FlatPlaylist = serde_json::from_slice(json)?;
    Ok(playlist
        .entries
        .into_iter()
        .enumerate()
        .filter(|(_, entry)| entry.playable())
        .map(|(i, entry)| SearchHit {
            artists: entry.artists(),
            kind: entry.kind(filter),
            title: entry.title.clone().unwrap_or_default(),
            video_id: entry.id,
            // the top slot only counts when it is playable itself
            top_result: filter == SearchFilter::Any && i == 0,
        })
        .collect())
}

#[async_trait]
impl MediaSearch for YtDlpSearch {
    async fn search(
        &self,
        query: &str,
        filter: SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let url = Self::search_url(query, filter);
        debug!("Searching {}", url);

        let mut command = Command::new(&self.binary);
        command
            .args(["--flat-playlist", "--dump-single-json", "--no-warnings"])
            .arg("--playlist-items")
            .arg(format!("1-{}", limit))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        command.arg(&url);

        let output = command.output().await.map_err(SearchError::Spawn)?;
        if !output.status.success() {
            return Err(SearchError::Backend {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_hits(&output.stdout, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url() {
        assert_eq!(
            YtDlpSearch::search_url("queen bohemian rhapsody", SearchFilter::Songs),
            "https://music.youtube.com/search?q=queen%20bohemian%20rhapsody#songs"
        );
        assert_eq!(
            YtDlpSearch::search_url("a&b", SearchFilter::Any),
            "https://music.youtube.com/search?q=a%26b"
        );
    }

    #[test]
    fn test_parse_song_hits() {
        let json = br#"{
            "_type": "playlist",
            "entries": [
                {"id": "fJ9rUzIMcZQ", "title": "Bohemian Rhapsody", "artists": ["Queen"]},
                {"id": "abc", "title": "Under Pressure", "artist": "Queen, David Bowie"},
                {"id": "def", "title": "Radio Ga Ga", "channel": "Queen - Topic"}
            ]
        }"#;
        let hits = parse_hits(json, SearchFilter::Songs).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].video_id, "fJ9rUzIMcZQ");
        assert_eq!(hits[0].artists, vec!["Queen"]);
        assert_eq!(hits[1].artists, vec!["Queen", "David Bowie"]);
        assert_eq!(hits[2].artists, vec!["Queen"]);
        assert!(hits.iter().all(|h| h.kind == HitKind::Song && !h.top_result));
    }

    #[test]
    fn test_parse_any_marks_top_result() {
        let json = br#"{"entries": [
            {"id": "a", "title": "One", "uploader": "Someone"},
            {"id": "b"}
        ]}"#;
        let hits = parse_hits(json, SearchFilter::Any).unwrap();
        assert!(hits[0].top_result);
        assert!(!hits[1].top_result);
        assert_eq!(hits[0].kind, HitKind::Video);
        assert_eq!(hits[1].title, "");
        assert!(hits[1].artists.is_empty());
    }

    #[test]
    fn test_parse_any_tells_songs_from_videos() {
        let json = br#"{"entries": [
            {"id": "a", "title": "Bohemian Rhapsody", "channel": "Queen - Topic", "ie_key": "Youtube"},
            {"id": "b", "title": "Bohemian Rhapsody (Official Video)", "channel": "Queen Official"},
            {"id": "c", "title": "Innuendo", "artists": ["Queen"]}
        ]}"#;
        let hits = parse_hits(json, SearchFilter::Any).unwrap();
        let kinds: Vec<HitKind> = hits.iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![HitKind::Song, HitKind::Video, HitKind::Song]);
        assert!(hits[0].top_result);
    }

    #[test]
    fn test_parse_skips_albums_and_artists() {
        let json = br#"{"entries": [
            {"id": "MPREb_album", "title": "A Night at the Opera", "ie_key": "YoutubeTab"},
            {"id": "x", "title": "Love of My Life", "channel": "Queen - Topic", "ie_key": "Youtube"},
            {"id": "UCqueen", "title": "Queen", "ie_key": "YoutubeTab"}
        ]}"#;
        let hits = parse_hits(json, SearchFilter::Any).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].video_id, "x");
        assert_eq!(hits[0].kind, HitKind::Song);
        assert!(!hits[0].top_result);
    }

    #[test]
    fn test_parse_without_entries() {
        assert!(parse_hits(br#"{"_type": "playlist"}"#, SearchFilter::Songs)
            .unwrap()
            .is_empty());
        assert!(matches!(
            parse_hits(b"garbage", SearchFilter::Songs),
            Err(SearchError::Parse(_))
        ));
    }
}
