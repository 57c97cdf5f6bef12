//! Track acquisition pipeline: URL → downloaded asset → library entry.
//!
//! The pipeline validates the submitted URL, extracts the stable `song_id`,
//! dedups against the library, and otherwise drives the external downloader
//! through the [`TrackFetcher`] trait. The downloader leaves an audio file
//! plus a JSON metadata sidecar named by job id; ingest merges the sidecar
//! record with the file's embedded tags into a [`Track`].
//!
//! A failed acquisition never mutates the queue or the library.

mod fetcher;
mod tags;

pub use fetcher::{SpotdlFetcher, TrackFetcher};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::library::{LibraryError, MediaLibrary, Track};
use tags::EmbeddedTags;

/// Errors raised while turning a URL into a library entry.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// URL does not match any recognized track-URL prefix.
    #[error("URL is not a recognized track URL")]
    InvalidUrl,

    /// URL matched a prefix but no id pattern captured a song id.
    #[error("could not extract a song id from URL: {0}")]
    UnrecognizedUrl(String),

    /// The downloader exited non-zero or could not be spawned.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The downloader finished but left no metadata sidecar.
    #[error("metadata sidecar not found: {0}")]
    SidecarMissing(PathBuf),

    /// No produced audio file matched the sidecar's track name.
    #[error("downloaded audio file not found for: {0}")]
    AudioFileMissing(String),

    /// Embedded tags could not be read from the audio file.
    #[error("tag read failed: {0}")]
    TagRead(String),

    /// Library persistence failed while committing the entry.
    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl AcquireError {
    /// User-facing message carried in the `url_processed` error payload.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "Invalid track URL. Please provide a valid track URL.",
            Self::UnrecognizedUrl(_) => "Could not extract a track id from that URL.",
            Self::DownloadFailed(_) => "Failed to download song",
            Self::SidecarMissing(_) => "Metadata file not found",
            Self::AudioFileMissing(_) => "Downloaded file not found",
            Self::TagRead(_) => "Could not read audio tags",
            Self::Library(_) => "Library unavailable",
        }
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The song was already in the library; no download ran.
    AlreadyInLibrary(Track),
    /// The song was downloaded and inserted.
    Downloaded(Track),
}

impl AcquireOutcome {
    /// The acquired track, regardless of how it got here.
    #[must_use]
    pub fn track(&self) -> &Track {
        match self {
            Self::AlreadyInLibrary(t) | Self::Downloaded(t) => t,
        }
    }
}

/// Result of the synchronous half of the pipeline (validate + dedup).
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Already in the library; the caller can enqueue immediately.
    Cached(Track),
    /// A download is required for this song id.
    NeedsDownload { song_id: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Recognition
// ─────────────────────────────────────────────────────────────────────────────

/// Recognized URL shapes and the ordered id-extraction patterns.
///
/// First matching pattern wins. The defaults recognise the streaming
/// service's track URLs; deployments can extend both lists via config.
pub struct UrlRules {
    prefixes: Vec<String>,
    patterns: Vec<Regex>,
}

impl UrlRules {
    /// Builds rules from substring prefixes and regex pattern sources.
    pub fn new(prefixes: Vec<String>, pattern_sources: &[&str]) -> Result<Self, regex::Error> {
        let patterns = pattern_sources
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { prefixes, patterns })
    }

    /// Returns true when the URL matches a recognized track-URL shape.
    #[must_use]
    pub fn is_valid(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.contains(p.as_str()))
    }

    /// Extracts the song id, first pattern match wins.
    #[must_use]
    pub fn song_id(&self, url: &str) -> Option<String> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(url) {
                if let Some(id) = caps.get(1) {
                    return Some(id.as_str().to_string());
                }
            }
        }
        None
    }
}

impl Default for UrlRules {
    fn default() -> Self {
        Self::new(
            vec![
                "spotify.com/track/".to_string(),
                "open.spotify.com/track/".to_string(),
            ],
            &[
                r"open\.spotify\.com/track/([a-zA-Z0-9]+)",
                r"spotify\.com/track/([a-zA-Z0-9]+)",
            ],
        )
        .expect("default URL patterns are valid")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sidecar
// ─────────────────────────────────────────────────────────────────────────────

/// The downloader's metadata record (first element of the sidecar array).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SidecarTrack {
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, alias = "album_name")]
    pub album: Option<String>,
}

fn parse_sidecar(raw: &str) -> Option<SidecarTrack> {
    serde_json::from_str::<Vec<SidecarTrack>>(raw)
        .ok()?
        .into_iter()
        .next()
}

/// Locates the produced audio file by the downloader's
/// `"Artist - Name.mp3"` naming convention: the segment after the first
/// `" - "` must equal the sidecar's track name.
fn find_downloaded_file(dir: &Path, track_name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "mp3") != Some(true) {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        let mut parts = stem.splitn(2, " - ");
        let _artist = parts.next();
        if let Some(name) = parts.next() {
            if name.trim() == track_name {
                return Some(path);
            }
        }
    }
    None
}

/// Merges the sidecar record with embedded tags into the final track.
///
/// Sidecar wins for name/artist/album; embedded tags win for cover art and
/// length. Both `name` and `title` end up populated.
fn build_track(
    sidecar: &SidecarTrack,
    embedded: EmbeddedTags,
    filepath: PathBuf,
    url: &str,
    song_id: &str,
) -> Track {
    let mut track = Track {
        song_id: song_id.to_string(),
        title: String::new(),
        name: sidecar.name.clone(),
        artist: if sidecar.artist.is_empty() {
            embedded.artist.unwrap_or_else(|| "Unknown Artist".into())
        } else {
            sidecar.artist.clone()
        },
        album: sidecar
            .album
            .clone()
            .or(embedded.album)
            .unwrap_or_else(|| "Unknown Album".into()),
        length_sec: embedded.length_sec,
        url: url.to_string(),
        filepath,
        cover_image: embedded.cover_image,
        has_cover_image: false,
    };
    if track.name.is_empty() {
        track.name = embedded.title.unwrap_or_else(|| "Unknown Title".into());
    }
    track.ensure_name_alias();
    track
}

// ─────────────────────────────────────────────────────────────────────────────
// Acquirer
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the acquisition pipeline for one server process.
pub struct Acquirer {
    library: Arc<MediaLibrary>,
    fetcher: Arc<dyn TrackFetcher>,
    downloads_dir: PathBuf,
    rules: UrlRules,
}

impl Acquirer {
    /// Creates an acquirer writing into `downloads_dir`.
    ///
    /// The directory is created if missing so the first download can land.
    pub fn new(
        library: Arc<MediaLibrary>,
        fetcher: Arc<dyn TrackFetcher>,
        downloads_dir: impl Into<PathBuf>,
        rules: UrlRules,
    ) -> std::io::Result<Self> {
        let downloads_dir = downloads_dir.into();
        std::fs::create_dir_all(&downloads_dir)?;
        Ok(Self {
            library,
            fetcher,
            downloads_dir,
            rules,
        })
    }

    /// Synchronous half of the pipeline: validate the URL, extract the
    /// song id and check the library. Cheap enough to run on the dispatch
    /// path so the dedup decision is made before any task is spawned.
    pub fn probe(&self, url: &str) -> Result<ProbeOutcome, AcquireError> {
        if !self.rules.is_valid(url) {
            return Err(AcquireError::InvalidUrl);
        }
        let song_id = self
            .rules
            .song_id(url)
            .ok_or_else(|| AcquireError::UnrecognizedUrl(url.to_string()))?;

        if let Some(existing) = self.library.lookup(&song_id) {
            log::info!(
                "[Acquire] {} already in library as {:?}",
                song_id,
                existing.title
            );
            return Ok(ProbeOutcome::Cached(existing));
        }
        Ok(ProbeOutcome::NeedsDownload { song_id })
    }

    /// Downloads, ingests and commits one song to the library.
    ///
    /// Runs to completion even if the initiator disconnects; the library
    /// keeps the entry either way.
    pub async fn download(&self, url: &str, song_id: &str) -> Result<Track, AcquireError> {
        let job_id = Uuid::new_v4().to_string();
        log::info!("[Acquire] Downloading {} (job {})", url, job_id);
        self.fetcher
            .fetch(url, &job_id, &self.downloads_dir)
            .await?;

        let track = self.ingest(url, song_id, &job_id)?;
        self.library.insert(track.clone())?;
        log::info!(
            "[Acquire] Downloaded {:?} ({} cover art)",
            track.title,
            if track.cover_image.is_some() {
                "with"
            } else {
                "no"
            }
        );
        Ok(track)
    }

    /// Runs the full pipeline for one URL.
    pub async fn acquire(&self, url: &str) -> Result<AcquireOutcome, AcquireError> {
        match self.probe(url)? {
            ProbeOutcome::Cached(track) => Ok(AcquireOutcome::AlreadyInLibrary(track)),
            ProbeOutcome::NeedsDownload { song_id } => self
                .download(url, &song_id)
                .await
                .map(AcquireOutcome::Downloaded),
        }
    }

    /// Reads the sidecar, locates the audio file and builds the track.
    fn ingest(&self, url: &str, song_id: &str, job_id: &str) -> Result<Track, AcquireError> {
        let sidecar_path = self.downloads_dir.join(format!("{job_id}.spotdl"));
        let raw = std::fs::read_to_string(&sidecar_path)
            .map_err(|_| AcquireError::SidecarMissing(sidecar_path.clone()))?;
        // The sidecar is ephemeral; remove it as soon as it is parsed.
        let _ = std::fs::remove_file(&sidecar_path);

        let sidecar =
            parse_sidecar(&raw).ok_or_else(|| AcquireError::SidecarMissing(sidecar_path))?;

        let filepath = find_downloaded_file(&self.downloads_dir, &sidecar.name)
            .ok_or_else(|| AcquireError::AudioFileMissing(sidecar.name.clone()))?;

        let embedded = tags::read_embedded_tags(&filepath)?;
        Ok(build_track(&sidecar, embedded, filepath, url, song_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const SIDECAR_JSON: &str =
        r#"[{"name": "Midnight City", "artist": "M83", "album_name": "Hurry Up, We're Dreaming"}]"#;

    /// Fetcher that counts invocations and writes whatever the test stages.
    struct FakeFetcher {
        calls: AtomicUsize,
        sidecar: Option<&'static str>,
        audio_file: Option<&'static str>,
    }

    impl FakeFetcher {
        fn new(sidecar: Option<&'static str>, audio_file: Option<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                sidecar,
                audio_file,
            }
        }
    }

    #[async_trait::async_trait]
    impl TrackFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _url: &str,
            job_id: &str,
            out_dir: &Path,
        ) -> Result<(), AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sidecar) = self.sidecar {
                std::fs::write(out_dir.join(format!("{job_id}.spotdl")), sidecar).unwrap();
            }
            if let Some(name) = self.audio_file {
                // Not a valid mp3 on purpose; tests that get this far expect
                // the tag reader to reject it.
                std::fs::write(out_dir.join(name), b"not really an mp3").unwrap();
            }
            Ok(())
        }
    }

    fn acquirer(dir: &Path, fetcher: Arc<FakeFetcher>) -> (Acquirer, Arc<MediaLibrary>) {
        let library = Arc::new(MediaLibrary::open(dir.join("music_data.json")).unwrap());
        let acq = Acquirer::new(
            Arc::clone(&library),
            fetcher,
            dir.join("downloads"),
            UrlRules::default(),
        )
        .unwrap();
        (acq, library)
    }

    const URL: &str = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=xyz";

    mod url_rules {
        use super::*;

        #[test]
        fn recognizes_track_urls() {
            let rules = UrlRules::default();
            assert!(rules.is_valid("https://open.spotify.com/track/abc123"));
            assert!(rules.is_valid("spotify.com/track/abc123?si=q"));
            assert!(!rules.is_valid("https://open.spotify.com/album/abc123"));
            assert!(!rules.is_valid("https://example.com/watch?v=abc"));
        }

        #[test]
        fn extracts_id_dropping_query_params() {
            let rules = UrlRules::default();
            assert_eq!(
                rules.song_id(URL).as_deref(),
                Some("4uLU6hMCjMI75M1A2tKUQC")
            );
        }

        #[test]
        fn no_pattern_match_yields_none() {
            let rules = UrlRules::default();
            assert_eq!(rules.song_id("https://open.spotify.com/track/"), None);
        }
    }

    mod pipeline {
        use super::*;

        #[tokio::test]
        async fn invalid_url_fails_without_fetch() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(None, None));
            let (acq, _) = acquirer(dir.path(), Arc::clone(&fetcher));

            let err = acq.acquire("https://example.com/nope").await.unwrap_err();
            assert!(matches!(err, AcquireError::InvalidUrl));
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn known_song_dedups_without_download() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(None, None));
            let (acq, library) = acquirer(dir.path(), Arc::clone(&fetcher));

            library
                .insert(Track {
                    song_id: "4uLU6hMCjMI75M1A2tKUQC".into(),
                    title: "Already Here".into(),
                    name: "Already Here".into(),
                    artist: "Someone".into(),
                    album: "Somewhere".into(),
                    length_sec: 200,
                    url: URL.into(),
                    filepath: "downloads/Someone - Already Here.mp3".into(),
                    cover_image: None,
                    has_cover_image: false,
                })
                .unwrap();

            let outcome = acq.acquire(URL).await.unwrap();
            assert!(matches!(outcome, AcquireOutcome::AlreadyInLibrary(_)));
            assert_eq!(outcome.track().title, "Already Here");
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn missing_sidecar_is_reported() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(None, None));
            let (acq, library) = acquirer(dir.path(), fetcher);

            let err = acq.acquire(URL).await.unwrap_err();
            assert!(matches!(err, AcquireError::SidecarMissing(_)));
            assert!(library.is_empty());
        }

        #[tokio::test]
        async fn missing_audio_file_is_reported() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(Some(SIDECAR_JSON), None));
            let (acq, library) = acquirer(dir.path(), fetcher);

            let err = acq.acquire(URL).await.unwrap_err();
            assert!(matches!(err, AcquireError::AudioFileMissing(_)));
            assert!(library.is_empty());
        }

        #[tokio::test]
        async fn unreadable_tags_are_reported_and_library_untouched() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(
                Some(SIDECAR_JSON),
                Some("M83 - Midnight City.mp3"),
            ));
            let (acq, library) = acquirer(dir.path(), fetcher);

            let err = acq.acquire(URL).await.unwrap_err();
            assert!(matches!(err, AcquireError::TagRead(_)));
            assert!(library.is_empty());
        }

        #[tokio::test]
        async fn sidecar_is_deleted_after_parse() {
            let dir = tempdir().unwrap();
            let fetcher = Arc::new(FakeFetcher::new(Some(SIDECAR_JSON), None));
            let (acq, _) = acquirer(dir.path(), fetcher);

            let _ = acq.acquire(URL).await;
            let leftover: Vec<_> = std::fs::read_dir(dir.path().join("downloads"))
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path().extension().map(|x| x == "spotdl") == Some(true)
                })
                .collect();
            assert!(leftover.is_empty());
        }
    }

    mod ingest_parts {
        use super::*;

        #[test]
        fn sidecar_first_element_wins() {
            let raw = r#"[{"name": "A", "artist": "X"}, {"name": "B", "artist": "Y"}]"#;
            let sidecar = parse_sidecar(raw).unwrap();
            assert_eq!(sidecar.name, "A");
            assert_eq!(sidecar.artist, "X");
        }

        #[test]
        fn file_matching_uses_second_segment() {
            let dir = tempdir().unwrap();
            std::fs::write(dir.path().join("M83 - Midnight City.mp3"), b"x").unwrap();
            std::fs::write(dir.path().join("Other - Song.mp3"), b"x").unwrap();
            std::fs::write(dir.path().join("Midnight City.txt"), b"x").unwrap();

            let found = find_downloaded_file(dir.path(), "Midnight City").unwrap();
            assert!(found.ends_with("M83 - Midnight City.mp3"));
            assert!(find_downloaded_file(dir.path(), "Nope").is_none());
        }

        #[test]
        fn file_matching_handles_dashes_in_title() {
            let dir = tempdir().unwrap();
            std::fs::write(dir.path().join("Artist - Song - With - Dashes.mp3"), b"x").unwrap();
            let found = find_downloaded_file(dir.path(), "Song - With - Dashes");
            assert!(found.is_some());
        }

        #[test]
        fn merge_prefers_sidecar_names_and_embedded_art() {
            let sidecar = SidecarTrack {
                name: "Midnight City".into(),
                artist: "M83".into(),
                album: Some("Hurry Up, We're Dreaming".into()),
            };
            let embedded = EmbeddedTags {
                title: Some("midnight city (remaster)".into()),
                artist: Some("M83 feat. nobody".into()),
                album: Some("Unknown Album".into()),
                length_sec: 243,
                cover_image: Some("Y292ZXI=".into()),
            };
            let track = build_track(
                &sidecar,
                embedded,
                PathBuf::from("downloads/M83 - Midnight City.mp3"),
                URL,
                "4uLU6hMCjMI75M1A2tKUQC",
            );

            assert_eq!(track.name, "Midnight City");
            assert_eq!(track.title, "Midnight City");
            assert_eq!(track.artist, "M83");
            assert_eq!(track.album, "Hurry Up, We're Dreaming");
            assert_eq!(track.length_sec, 243);
            assert_eq!(track.cover_image.as_deref(), Some("Y292ZXI="));
        }

        #[test]
        fn merge_falls_back_to_embedded_when_sidecar_sparse() {
            let sidecar = SidecarTrack {
                name: String::new(),
                artist: String::new(),
                album: None,
            };
            let embedded = EmbeddedTags {
                title: Some("Tagged Title".into()),
                artist: Some("Tagged Artist".into()),
                album: None,
                length_sec: 10,
                cover_image: None,
            };
            let track = build_track(&sidecar, embedded, PathBuf::from("a.mp3"), URL, "id");
            assert_eq!(track.title, "Tagged Title");
            assert_eq!(track.artist, "Tagged Artist");
            assert_eq!(track.album, "Unknown Album");
        }
    }
}
