//! Wire protocol shared by the server and every client.
//!
//! Each message on the sync bus is a single JSON object tagged by `type`,
//! mirrored here as the internally-tagged [`ClientEvent`] / [`ServerEvent`]
//! enums. Event names and payload shapes are part of the protocol and must
//! not change without a coordinated client/server rollout.

use serde::{Deserialize, Serialize};

use crate::library::Track;

// ─────────────────────────────────────────────────────────────────────────────
// Canonical Audio Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical PCM sample rate (Hz) for every streamed track.
pub const SAMPLE_RATE: u32 = 44_100;

/// Canonical channel count (mono).
pub const CHANNELS: u16 = 1;

/// Canonical bit depth (signed 16-bit little-endian).
pub const BITS_PER_SAMPLE: u16 = 16;

/// Size of one streamed PCM chunk in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Samples per chunk (2 bytes per 16-bit sample).
pub const SAMPLES_PER_CHUNK: usize = CHUNK_SIZE / 2;

// ─────────────────────────────────────────────────────────────────────────────
// Room Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Length of a room code (uppercase alphanumeric).
pub const ROOM_CODE_LEN: usize = 6;

/// Number of rendered seats around the campfire.
pub const SEAT_COUNT: u8 = 4;

/// Maximum username length accepted by the UI.
pub const MAX_USERNAME_LEN: usize = 6;

/// Number of selectable participant colors.
pub const COLOR_COUNT: u8 = 7;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "ember-jams";

/// Converts a playback position in seconds to the chunk index that contains it.
///
/// Both ends of the wire must use this exact formula to stay in frame-phase
/// after a seek or resume.
#[must_use]
pub fn chunk_index_for_position(position_secs: f64) -> usize {
    if position_secs <= 0.0 {
        return 0;
    }
    (position_secs * SAMPLE_RATE as f64 / SAMPLES_PER_CHUNK as f64) as usize
}

/// Converts a chunk index back to the wall-clock position of its first sample.
#[must_use]
pub fn position_for_chunk(chunk_index: usize) -> f64 {
    chunk_index as f64 * SAMPLES_PER_CHUNK as f64 / SAMPLE_RATE as f64
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Payload Types
// ─────────────────────────────────────────────────────────────────────────────

/// One participant as rendered by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub username: String,
    pub color_idx: u8,
    /// Seat index (0..3); seat 0 is the host's.
    pub position: u8,
}

/// Outcome of URL processing, carried by `url_processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    Success,
    Error,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server Events
// ─────────────────────────────────────────────────────────────────────────────

/// Events a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateRoom {
        username: String,
        color_idx: u8,
    },
    JoinRoom {
        room_code: String,
        username: String,
        color_idx: u8,
    },
    AddUrlToQueue {
        room_code: String,
        url: String,
    },
    /// Replaces the room queue wholesale (shuffle, remove-from-queue).
    /// Tracks arrive cover-stripped; the server restores cover art from its
    /// library before storing and re-broadcasting.
    SyncQueue {
        room_code: String,
        queue: Vec<Track>,
    },
    SyncCurrentIndex {
        room_code: String,
        current_idx: i64,
    },
    PlaySong {
        room_code: String,
        song_index: usize,
    },
    PauseStream {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    ResumeStream {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    SeekStream {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    RequestAudioChunk {
        room_code: String,
        chunk_index: usize,
    },
    UserTalkingState {
        room_code: String,
        username: String,
        is_talking: bool,
    },
    /// Opaque voice frame, relayed unchanged to the rest of the sender's room.
    VoiceData {
        data: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client Events
// ─────────────────────────────────────────────────────────────────────────────

/// Events the server sends to clients (broadcast or unicast).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomCreated {
        room_code: String,
    },
    RoomJoined {
        room_code: String,
        players: Vec<PlayerInfo>,
    },
    UserJoined {
        username: String,
        color_idx: u8,
        position_idx: u8,
    },
    UserLeft {
        username: String,
    },
    PlayersUpdated {
        players: Vec<PlayerInfo>,
    },
    UrlProcessing {
        message: String,
    },
    UrlProcessed {
        status: UrlStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song: Option<Track>,
    },
    /// Queue snapshot sent to a single joiner.
    QueueUpdated {
        queue: Vec<Track>,
    },
    /// Queue replacement broadcast to the whole room.
    QueueSynced {
        queue: Vec<Track>,
        updated_by: String,
    },
    CurrentIndexSynced {
        room_code: String,
        current_idx: i64,
        updated_by: String,
    },
    SongStarted {
        room_code: String,
        song_index: usize,
        song: Track,
    },
    StreamPaused {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    StreamResumed {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    StreamSeeked {
        room_code: String,
        song_index: usize,
        position: f64,
    },
    AudioStreamReady {
        room_code: String,
        song: Track,
        total_chunks: usize,
    },
    AudioChunk {
        room_code: String,
        chunk_index: usize,
        /// Base64-encoded 16-bit LE mono PCM, [`CHUNK_SIZE`] bytes or less at EOF.
        audio_data: String,
    },
    UserTalkingUpdate {
        username: String,
        is_talking: bool,
    },
    VoiceData {
        data: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// Serializes the event to its wire JSON form.
    ///
    /// Returns `None` only if serialization fails, which would indicate a bug
    /// in the payload types rather than a runtime condition.
    #[must_use]
    pub fn to_wire(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}
