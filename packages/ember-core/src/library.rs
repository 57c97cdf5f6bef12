//! Disk-backed media library.
//!
//! The library is the content-addressed store of every track the server has
//! ever downloaded, keyed by `song_id`. The on-disk form is a single JSON
//! index file (ordered entry list) next to the downloaded audio files; the
//! index is rewritten atomically on every insert so a crash can never leave
//! a half-written file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by library persistence.
///
/// Callers surface any of these as "library unavailable"; the library never
/// returns partial entries.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Index file could not be read or written.
    #[error("library I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index file exists but does not parse.
    #[error("library index corrupt: {0}")]
    Index(#[from] serde_json::Error),
}

/// One downloaded track. Immutable after creation.
///
/// `name` and `title` carry the same value; both keys exist on the wire for
/// compatibility with the sidecar format (which uses `name`) and the tag
/// format (which uses `title`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier extracted from the source URL; unique in the library.
    pub song_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Track length in whole seconds.
    #[serde(rename = "length", default)]
    pub length_sec: u64,
    pub url: String,
    pub filepath: PathBuf,
    /// Base64-encoded cover image bytes, if the file carried embedded art.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    /// Wire-only marker: set when `cover_image` was stripped before shipping,
    /// so the receiving side knows to restore it from its own library.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_cover_image: bool,
}

impl Track {
    /// Fills whichever of `name`/`title` is empty from the other.
    pub fn ensure_name_alias(&mut self) {
        if self.title.is_empty() && !self.name.is_empty() {
            self.title = self.name.clone();
        } else if self.name.is_empty() && !self.title.is_empty() {
            self.name = self.title.clone();
        }
    }

    /// Returns a copy suitable for shipping in a client-originated queue:
    /// cover bytes dropped, `has_cover_image` set so the receiver restores
    /// them from its own library by `song_id`.
    #[must_use]
    pub fn stripped_for_wire(&self) -> Track {
        let mut t = self.clone();
        t.has_cover_image = t.cover_image.is_some();
        t.cover_image = None;
        t
    }
}

struct LibraryInner {
    entries: Vec<Track>,
    by_id: HashMap<String, usize>,
}

/// Process-wide track store, shared behind an `Arc` by the acquisition
/// pipeline, the room registry (cover-art restoration) and the engine.
pub struct MediaLibrary {
    index_path: PathBuf,
    inner: RwLock<LibraryInner>,
}

impl MediaLibrary {
    /// Opens the library at `index_path`, loading the index if it exists.
    ///
    /// A missing index file means an empty library; a present but corrupt
    /// index is an error (better to refuse startup than silently discard
    /// the collection).
    pub fn open(index_path: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let index_path = index_path.into();
        let entries: Vec<Track> = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };

        let mut by_id = HashMap::with_capacity(entries.len());
        let mut deduped = Vec::with_capacity(entries.len());
        for mut track in entries {
            track.ensure_name_alias();
            if by_id.contains_key(&track.song_id) {
                log::warn!(
                    "[Library] Duplicate song_id {} in index, keeping first",
                    track.song_id
                );
                continue;
            }
            by_id.insert(track.song_id.clone(), deduped.len());
            deduped.push(track);
        }

        log::info!(
            "[Library] Loaded {} track(s) from {}",
            deduped.len(),
            index_path.display()
        );

        Ok(Self {
            index_path,
            inner: RwLock::new(LibraryInner {
                entries: deduped,
                by_id,
            }),
        })
    }

    /// Looks up a track by `song_id`.
    #[must_use]
    pub fn lookup(&self, song_id: &str) -> Option<Track> {
        let inner = self.inner.read();
        inner
            .by_id
            .get(song_id)
            .map(|&idx| inner.entries[idx].clone())
    }

    /// Inserts a track and flushes the index to disk atomically.
    ///
    /// Inserting an already-present `song_id` replaces the stored entry
    /// (re-downloads refresh metadata).
    pub fn insert(&self, mut track: Track) -> Result<(), LibraryError> {
        track.ensure_name_alias();
        let mut inner = self.inner.write();
        let existing = inner.by_id.get(&track.song_id).copied();
        match existing {
            Some(idx) => inner.entries[idx] = track,
            None => {
                let idx = inner.entries.len();
                inner.by_id.insert(track.song_id.clone(), idx);
                inner.entries.push(track);
            }
        }
        self.persist(&inner.entries)
    }

    /// Snapshot of all entries in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Track> {
        self.inner.read().entries.clone()
    }

    /// Number of tracks in the library.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true when the library holds no tracks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restores cover-art bytes on a queue that arrived cover-stripped.
    ///
    /// Tracks flagged `has_cover_image` get their bytes back from the library
    /// entry with the same `song_id`; the flag is cleared either way.
    #[must_use]
    pub fn restore_cover_art(&self, queue: Vec<Track>) -> Vec<Track> {
        let inner = self.inner.read();
        queue
            .into_iter()
            .map(|mut track| {
                if track.has_cover_image && track.cover_image.is_none() {
                    if let Some(&idx) = inner.by_id.get(&track.song_id) {
                        track.cover_image = inner.entries[idx].cover_image.clone();
                    }
                }
                track.has_cover_image = false;
                track
            })
            .collect()
    }

    /// Writes the full index to a temp file and renames it into place.
    fn persist(&self, entries: &[Track]) -> Result<(), LibraryError> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }

    /// Path of the on-disk index (used by startup logging).
    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}
