//! Embedded tag extraction for downloaded audio files.

use std::path::Path;

use base64::Engine as _;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;

use super::AcquireError;

/// Metadata read from the file's embedded tags.
#[derive(Debug, Clone)]
pub(crate) struct EmbeddedTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in whole seconds, from the audio properties.
    pub length_sec: u64,
    /// First embedded picture, base64-encoded.
    pub cover_image: Option<String>,
}

/// Reads title/artist/album, duration and front cover from the file.
///
/// A file with no tags at all still succeeds (all text fields `None`);
/// an unparseable file is a [`AcquireError::TagRead`].
pub(crate) fn read_embedded_tags(path: &Path) -> Result<EmbeddedTags, AcquireError> {
    let tagged = Probe::open(path)
        .map_err(|e| AcquireError::TagRead(e.to_string()))?
        .read()
        .map_err(|e| AcquireError::TagRead(e.to_string()))?;

    let length_sec = tagged.properties().duration().as_secs();

    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    let (title, artist, album, cover_image) = match tag {
        Some(tag) => {
            let cover = tag
                .pictures()
                .first()
                .filter(|pic| !pic.data().is_empty())
                .map(|pic| base64::engine::general_purpose::STANDARD.encode(pic.data()));
            (
                tag.title().map(|s| s.to_string()),
                tag.artist().map(|s| s.to_string()),
                tag.album().map(|s| s.to_string()),
                cover,
            )
        }
        None => {
            log::warn!("[Acquire] No tags in {}", path.display());
            (None, None, None, None)
        }
    };

    Ok(EmbeddedTags {
        title,
        artist,
        album,
        length_sec,
        cover_image,
    })
}
