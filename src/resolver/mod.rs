pub mod search;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::alias::AliasStore;
use crate::track::TrackDescriptor;
use crate::utils::text::{contains_any, normalize, similarity};
use search::{HitKind, MediaSearch, SearchError, SearchFilter, SearchHit};

const SEARCH_LIMIT: usize = 5;
const STRICT_RATIO: u8 = 90;
const LOOSE_RATIO: u8 = 40;

/// A playable remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    video_id: String,
}

impl MediaRef {
    pub fn from_video_id(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }

    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Which pass produced the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// The candidate title contains the query title.
    Exact,
    /// Title and artist both scored at least 90.
    Fuzzy,
    /// The title-only search's top result loosely matched.
    TopResult,
    /// Nothing matched; first result taken as-is.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub link: MediaRef,
    pub confidence: Confidence,
}

impl Resolution {
    fn new(hit: &SearchHit, confidence: Confidence) -> Self {
        Self {
            link: MediaRef::from_video_id(hit.video_id.clone()),
            confidence,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("search for {query:?} failed: {source}")]
    Search {
        query: String,
        #[source]
        source: SearchError,
    },
}

/// Maps a track descriptor to the best-matching remote item.
pub struct Resolver {
    search: Arc<dyn MediaSearch>,
    aliases: Arc<AliasStore>,
    ignored_keywords: Vec<String>,
}

fn joined_artists(hit: &SearchHit) -> String {
    hit.artists
        .iter()
        .map(|artist| normalize(artist))
        .collect::<Vec<_>>()
        .join(", ")
}

fn artist_score(artist: &str, candidate_artists: &str) -> u8 {
    if candidate_artists.contains(artist) {
        100
    } else {
        similarity(artist, candidate_artists)
    }
}

/// Scores used by the fuzzy pass. A candidate whose every word already
/// appears in the query title counts as a full title match.
fn fuzzy_scores(title: &str, artist: &str, hit: &SearchHit) -> (u8, u8) {
    let candidate = normalize(&hit.title);
    let title_score = if candidate.split_whitespace().all(|word| title.contains(word)) {
        100
    } else {
        similarity(title, &candidate)
    };
    (title_score, artist_score(artist, &joined_artists(hit)))
}

fn fallback_scores(title: &str, artist: &str, hit: &SearchHit) -> (u8, u8) {
    let candidate = normalize(&hit.title);
    let title_score = if candidate.contains(title) {
        100
    } else {
        similarity(title, &candidate)
    };
    (title_score, artist_score(artist, &joined_artists(hit)))
}

fn promotable(hit: &SearchHit) -> bool {
    (hit.top_result && hit.kind == HitKind::Song) || hit.kind == HitKind::Video
}

impl Resolver {
    pub fn new(
        search: Arc<dyn MediaSearch>,
        aliases: Arc<AliasStore>,
        ignored_keywords: Vec<String>,
    ) -> Self {
        Self {
            search,
            aliases,
            ignored_keywords,
        }
    }

    async fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<SearchHit>, ResolveError> {
        let hits = self
            .search
            .search(query, filter, SEARCH_LIMIT)
            .await
            .map_err(|source| ResolveError::Search {
                query: query.to_string(),
                source,
            })?;
        Ok(hits
            .into_iter()
            .filter(|hit| !contains_any(&hit.title, &self.ignored_keywords))
            .collect())
    }

    /// Finds a link for `track`.
    ///
    /// `Ok(None)` means every search came back empty. Any other outcome
    /// yields a link, with [`Confidence::Fallback`] marking a guess.
    pub async fn resolve(&self, track: &TrackDescriptor) -> Result<Option<Resolution>, ResolveError> {
        let artist = normalize(&self.aliases.lookup(&track.artist));
        let title = normalize(&track.title);

        let primary = self
            .search(&format!("{} {}", artist, title), SearchFilter::Songs)
            .await?;

        if let Some(hit) = primary
            .iter()
            .find(|hit| normalize(&hit.title).contains(&title))
        {
            return Ok(Some(Resolution::new(hit, Confidence::Exact)));
        }

        if let Some(hit) = primary.iter().find(|hit| {
            let (title_score, artist_score) = fuzzy_scores(&title, &artist, hit);
            title_score >= STRICT_RATIO && artist_score >= STRICT_RATIO
        }) {
            return Ok(Some(Resolution::new(hit, Confidence::Fuzzy)));
        }

        let secondary = self.search(&title, SearchFilter::Any).await?;
        if let Some(top) = secondary.first().filter(|hit| promotable(hit)) {
            let (title_score, artist_score) = fallback_scores(&title, &artist, top);
            debug!(
                "Top result {} scored title={} artist={}",
                top.video_id, title_score, artist_score
            );
            if (title_score >= STRICT_RATIO && artist_score >= LOOSE_RATIO)
                || (title_score >= LOOSE_RATIO && artist_score >= STRICT_RATIO)
            {
                return Ok(Some(Resolution::new(top, Confidence::TopResult)));
            }
        }

        Ok(primary
            .first()
            .or(secondary.first())
            .map(|hit| Resolution::new(hit, Confidence::Fallback)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub fn hit(id: &str, title: &str, artists: &[&str], kind: HitKind, top_result: bool) -> SearchHit {
        SearchHit {
            video_id: id.to_string(),
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            kind,
            top_result,
        }
    }

    pub fn song(id: &str, title: &str, artists: &[&str]) -> SearchHit {
        hit(id, title, artists, HitKind::Song, false)
    }

    /// Canned results per filter; records every query.
    #[derive(Default)]
    pub struct FakeSearch {
        pub songs: Vec<SearchHit>,
        pub any: Vec<SearchHit>,
        pub fail: bool,
        pub queries: Mutex<Vec<(String, SearchFilter)>>,
    }

    #[async_trait]
    impl MediaSearch for FakeSearch {
        async fn search(
            &self,
            query: &str,
            filter: SearchFilter,
            limit: usize,
        ) -> Result<Vec<SearchHit>, SearchError> {
            self.queries.lock().unwrap().push((query.to_string(), filter));
            if self.fail {
                return Err(SearchError::Backend {
                    status: "exit status: 1".to_string(),
                    stderr: "HTTP Error 429".to_string(),
                });
            }
            let hits = match filter {
                SearchFilter::Songs => &self.songs,
                SearchFilter::Any => &self.any,
            };
            Ok(hits.iter().take(limit).cloned().collect())
        }
    }

    fn resolver(search: Arc<FakeSearch>) -> Resolver {
        Resolver::new(search, Arc::new(AliasStore::new()), Vec::new())
    }

    #[tokio::test]
    async fn test_substring_match_is_accepted_immediately() {
        let search = Arc::new(FakeSearch {
            songs: vec![song("fJ9rUzIMcZQ", "Bohemian Rhapsody (Remastered 2011)", &["Queen"])],
            ..Default::default()
        });
        let resolved = resolver(search.clone())
            .resolve(&TrackDescriptor::new("Queen", "Bohemian Rhapsody", ""))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.confidence, Confidence::Exact);
        assert_eq!(resolved.link.url(), "https://www.youtube.com/watch?v=fJ9rUzIMcZQ");
        let queries = search.queries.lock().unwrap();
        assert_eq!(
            *queries,
            vec![("queen bohemian rhapsody".to_string(), SearchFilter::Songs)]
        );
    }

    #[tokio::test]
    async fn test_fuzzy_pass_accepts_close_title_and_artist() {
        let search = Arc::new(FakeSearch {
            songs: vec![
                song("x", "Paradise City", &["Guns N' Roses"]),
                song("y", "Sweet Child O' Mine", &["Guns N' Roses"]),
            ],
            ..Default::default()
        });
        let resolved = resolver(search.clone())
            .resolve(&TrackDescriptor::new("Guns N Roses", "Sweet Child O Mine", ""))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.confidence, Confidence::Fuzzy);
        assert_eq!(resolved.link, MediaRef::from_video_id("y"));
        assert_eq!(search.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_low_scores_fall_through_to_top_result() {
        let search = Arc::new(FakeSearch {
            songs: vec![song("primary", "Completely Different", &["Other Artist"])],
            any: vec![hit(
                "top",
                "Sweet Child O' Mine",
                &["Guns N' Roses"],
                HitKind::Video,
                true,
            )],
            ..Default::default()
        });
        let resolved = resolver(search.clone())
            .resolve(&TrackDescriptor::new("Guns N Roses", "Sweet Child O Mine", ""))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.confidence, Confidence::TopResult);
        assert_eq!(resolved.link, MediaRef::from_video_id("top"));
        let queries = search.queries.lock().unwrap();
        assert_eq!(queries[1], ("sweet child o mine".to_string(), SearchFilter::Any));
    }

    #[tokio::test]
    async fn test_unmatched_top_result_keeps_first_primary_hit() {
        let search = Arc::new(FakeSearch {
            songs: vec![
                song("first", "Completely Different", &["Other Artist"]),
                song("second", "Another One", &["Nobody"]),
            ],
            any: vec![hit("top", "Unrelated", &["Someone"], HitKind::Video, true)],
            ..Default::default()
        });
        let resolved = resolver(search)
            .resolve(&TrackDescriptor::new("Queen", "Innuendo", ""))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.confidence, Confidence::Fallback);
        assert_eq!(resolved.link, MediaRef::from_video_id("first"));
    }

    #[tokio::test]
    async fn test_asymmetric_thresholds() {
        // title scores 60, artist matches fully
        let loose_title = Arc::new(FakeSearch {
            any: vec![hit("t", "abcdefXXXX", &["Queen"], HitKind::Video, true)],
            ..Default::default()
        });
        let resolved = resolver(loose_title)
            .resolve(&TrackDescriptor::new("Queen", "abcdefghij", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.confidence, Confidence::TopResult);

        // both score 60
        let loose_both = Arc::new(FakeSearch {
            any: vec![hit("t", "abcdefXXXX", &["abcdXXXXij"], HitKind::Video, true)],
            ..Default::default()
        });
        let resolved = resolver(loose_both)
            .resolve(&TrackDescriptor::new("abcdefghij", "abcdefghij", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.confidence, Confidence::Fallback);
        assert_eq!(resolved.link, MediaRef::from_video_id("t"));
    }

    #[tokio::test]
    async fn test_song_that_is_not_top_result_is_not_promoted() {
        let search = Arc::new(FakeSearch {
            any: vec![song("s", "Innuendo", &["Queen"])],
            ..Default::default()
        });
        let resolved = resolver(search)
            .resolve(&TrackDescriptor::new("Queen", "Innuendo (Live)", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.confidence, Confidence::Fallback);
    }

    #[tokio::test]
    async fn test_empty_searches_yield_nothing() {
        let search = Arc::new(FakeSearch::default());
        let resolved = resolver(search.clone())
            .resolve(&TrackDescriptor::new("Queen", "Innuendo", ""))
            .await
            .unwrap();
        assert!(resolved.is_none());
        assert_eq!(search.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_is_an_error() {
        let search = Arc::new(FakeSearch {
            fail: true,
            ..Default::default()
        });
        let err = resolver(search)
            .resolve(&TrackDescriptor::new("Queen", "Innuendo", ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("queen innuendo"));
    }

    #[tokio::test]
    async fn test_alias_canonicalizes_artist() {
        let aliases = Arc::new(AliasStore::new());
        aliases.add("GNR", "Guns N' Roses");
        let search = Arc::new(FakeSearch::default());
        let resolver = Resolver::new(search.clone(), aliases, Vec::new());

        resolver
            .resolve(&TrackDescriptor::new("GNR", "Patience", ""))
            .await
            .unwrap();
        assert_eq!(
            search.queries.lock().unwrap()[0].0,
            "guns n' roses patience"
        );
    }

    #[tokio::test]
    async fn test_ignored_keywords_are_skipped() {
        let search = Arc::new(FakeSearch {
            songs: vec![
                song("karaoke", "Halo (Karaoke Version)", &["Beyoncé"]),
                song("real", "Halo", &["Beyoncé"]),
            ],
            ..Default::default()
        });
        let resolver = Resolver::new(search, Arc::new(AliasStore::new()), vec!["karaoke".to_string()]);
        let resolved = resolver
            .resolve(&TrackDescriptor::new("Beyoncé", "Halo", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.link, MediaRef::from_video_id("real"));
    }
}
