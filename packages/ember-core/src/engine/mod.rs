//! PCM streaming engine.
//!
//! Each room with an active track owns one canonical PCM buffer: signed
//! 16-bit little-endian mono at 44.1 kHz. The engine serves fixed-size byte
//! chunks by index on demand. The engine is oblivious to play/pause; the
//! sync bus enforces the pause policy by not asking.

pub mod decode;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

use crate::library::Track;
use crate::protocol::{chunk_index_for_position, CHUNK_SIZE};

/// Errors raised while loading a track into a PCM buffer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Audio file could not be opened.
    #[error("could not open audio file: {0}")]
    Open(#[from] std::io::Error),

    /// Container format was not recognized.
    #[error("unsupported audio format: {0}")]
    Probe(String),

    /// The container holds no decodable audio track.
    #[error("no decodable audio track")]
    NoAudioTrack,

    /// Decoding failed partway through the file.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Sample-rate conversion failed.
    #[error("resample failed: {0}")]
    Resample(String),
}

struct RoomAudio {
    pcm: Bytes,
    /// Last chunk position the room converged on (reset on load, moved on seek).
    cursor: usize,
}

/// Per-room PCM buffers, keyed by room code.
///
/// Buffers are replaced whenever the room's current track changes and
/// dropped when the room is deleted.
#[derive(Default)]
pub struct PcmEngine {
    buffers: DashMap<String, RoomAudio>,
}

impl PcmEngine {
    /// Creates an engine with no loaded buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `track` to canonical PCM and installs it for `room_code`.
    ///
    /// Replaces any previous buffer and resets the chunk cursor to 0.
    /// Returns the total number of whole chunks.
    pub fn load(&self, room_code: &str, track: &Track) -> Result<usize, EngineError> {
        let pcm = decode::decode_to_canonical(&track.filepath)?;
        log::info!(
            "[Engine] Loaded {:?} for room {}: {} bytes ({:.2}s)",
            track.title,
            room_code,
            pcm.len(),
            pcm.len() as f64 / 2.0 / crate::protocol::SAMPLE_RATE as f64,
        );
        Ok(self.load_pcm(room_code, pcm))
    }

    /// Installs an already-canonical PCM buffer. Returns total whole chunks.
    pub fn load_pcm(&self, room_code: &str, pcm: Bytes) -> usize {
        let total = pcm.len() / CHUNK_SIZE;
        self.buffers
            .insert(room_code.to_string(), RoomAudio { pcm, cursor: 0 });
        total
    }

    /// Returns the chunk at `chunk_index`, or `None` past EOF / no buffer.
    ///
    /// The final chunk may be shorter than [`CHUNK_SIZE`].
    #[must_use]
    pub fn serve(&self, room_code: &str, chunk_index: usize) -> Option<Bytes> {
        let audio = self.buffers.get(room_code)?;
        let start = chunk_index.checked_mul(CHUNK_SIZE)?;
        if start >= audio.pcm.len() {
            return None;
        }
        let end = (start + CHUNK_SIZE).min(audio.pcm.len());
        Some(audio.pcm.slice(start..end))
    }

    /// Moves the room's chunk cursor to the position in seconds.
    ///
    /// Returns the resulting chunk index, or `None` when the room has no
    /// buffer loaded.
    pub fn seek(&self, room_code: &str, position_secs: f64) -> Option<usize> {
        let mut audio = self.buffers.get_mut(room_code)?;
        let idx = chunk_index_for_position(position_secs);
        audio.cursor = idx;
        Some(idx)
    }

    /// The room's current chunk cursor, if a buffer is loaded.
    #[must_use]
    pub fn cursor(&self, room_code: &str) -> Option<usize> {
        self.buffers.get(room_code).map(|a| a.cursor)
    }

    /// Total whole chunks of the loaded buffer.
    #[must_use]
    pub fn total_chunks(&self, room_code: &str) -> Option<usize> {
        self.buffers.get(room_code).map(|a| a.pcm.len() / CHUNK_SIZE)
    }

    /// Drops the room's buffer (track change handles this via `load`;
    /// room deletion calls it directly).
    pub fn unload(&self, room_code: &str) {
        if self.buffers.remove(room_code).is_some() {
            log::debug!("[Engine] Unloaded buffer for room {}", room_code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3.5 chunks of ascending bytes.
    fn test_pcm() -> Bytes {
        let len = CHUNK_SIZE * 3 + CHUNK_SIZE / 2;
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn total_chunks_is_integer_division() {
        let engine = PcmEngine::new();
        let total = engine.load_pcm("R", test_pcm());
        assert_eq!(total, 3);
        assert_eq!(engine.total_chunks("R"), Some(3));
    }

    #[test]
    fn served_chunks_align_with_buffer_slices() {
        let engine = PcmEngine::new();
        let pcm = test_pcm();
        engine.load_pcm("R", pcm.clone());

        for i in 0..3 {
            let chunk = engine.serve("R", i).unwrap();
            assert_eq!(&chunk[..], &pcm[i * CHUNK_SIZE..(i + 1) * CHUNK_SIZE]);
        }
    }

    #[test]
    fn tail_chunk_is_partial_then_eof() {
        let engine = PcmEngine::new();
        let pcm = test_pcm();
        engine.load_pcm("R", pcm.clone());

        let tail = engine.serve("R", 3).unwrap();
        assert_eq!(tail.len(), CHUNK_SIZE / 2);
        assert_eq!(&tail[..], &pcm[3 * CHUNK_SIZE..]);
        assert!(engine.serve("R", 4).is_none());
    }

    #[test]
    fn unknown_room_serves_nothing() {
        let engine = PcmEngine::new();
        assert!(engine.serve("NOPE", 0).is_none());
    }

    #[test]
    fn seek_moves_cursor_by_chunk_formula() {
        let engine = PcmEngine::new();
        engine.load_pcm("R", test_pcm());
        assert_eq!(engine.cursor("R"), Some(0));
        assert_eq!(engine.seek("R", 12.3), Some(264));
        assert_eq!(engine.cursor("R"), Some(264));
        assert_eq!(engine.seek("NOPE", 12.3), None);
    }

    #[test]
    fn reload_replaces_buffer_and_resets_cursor() {
        let engine = PcmEngine::new();
        engine.load_pcm("R", test_pcm());
        engine.seek("R", 30.0);
        let total = engine.load_pcm("R", Bytes::from(vec![0u8; CHUNK_SIZE]));
        assert_eq!(total, 1);
        assert_eq!(engine.cursor("R"), Some(0));
    }

    #[test]
    fn unload_drops_buffer() {
        let engine = PcmEngine::new();
        engine.load_pcm("R", test_pcm());
        engine.unload("R");
        assert!(engine.serve("R", 0).is_none());
        assert_eq!(engine.total_chunks("R"), None);
    }

    #[test]
    fn load_missing_file_is_open_error() {
        let engine = PcmEngine::new();
        let track = Track {
            song_id: "x".into(),
            title: "Missing".into(),
            name: "Missing".into(),
            artist: "A".into(),
            album: "B".into(),
            length_sec: 1,
            url: "u".into(),
            filepath: "/definitely/not/here.mp3".into(),
            cover_image: None,
            has_cover_image: false,
        };
        assert!(matches!(
            engine.load("R", &track),
            Err(EngineError::Open(_))
        ));
    }
}
