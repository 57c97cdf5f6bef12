//! Per-room authoritative state.
//!
//! A room owns its participant list (seats, host) and the shared queue. All
//! transitions here are pure state changes returning the data the sync bus
//! needs for its broadcasts; the bus performs the actual sends while the
//! dispatch serialization lock is held, which gives per-room event ordering.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::Rng;
use thiserror::Error;

use crate::library::Track;
use crate::protocol::{PlayerInfo, MAX_USERNAME_LEN, ROOM_CODE_LEN, SEAT_COUNT};

/// Errors raised by room transitions.
#[derive(Debug, Error)]
pub enum RoomError {
    /// No live room with this code.
    #[error("room not found: {0}")]
    NotFound(String),

    /// `play_song` index outside the queue.
    #[error("song index {index} out of range (queue length {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// One connected participant of a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub sid: String,
    pub username: String,
    pub color_idx: u8,
    /// Seat index (0..3); the host sits at seat 0.
    pub seat: u8,
}

impl Participant {
    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            username: self.username.clone(),
            color_idx: self.color_idx,
            position: self.seat,
        }
    }
}

/// Authoritative state of one jam room.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    /// Insertion-ordered; the order decides host succession.
    pub participants: Vec<Participant>,
    pub host_sid: String,
    pub queue: Vec<Track>,
    /// `-1` means no track selected.
    pub current_index: i64,
    pub is_playing: bool,
    pub paused: bool,
}

impl Room {
    /// Smallest seat in `{0..3}` not currently occupied; falls back to
    /// seat 0 when the room is oversubscribed (tolerated, not rejected).
    fn free_seat(&self) -> u8 {
        let used: Vec<u8> = self.participants.iter().map(|p| p.seat).collect();
        (0..SEAT_COUNT).find(|s| !used.contains(s)).unwrap_or(0)
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.participants.iter().map(Participant::info).collect()
    }
}

/// Data returned to the bus after a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub seat: u8,
    pub players: Vec<PlayerInfo>,
    pub queue: Vec<Track>,
    pub current_index: i64,
}

/// Data returned to the bus after a departure.
#[derive(Debug)]
pub struct Departure {
    pub room_code: String,
    pub username: String,
    /// True when the departing participant was the last one.
    pub room_deleted: bool,
    /// Sid of the participant promoted to host, if the host left.
    pub promoted_host: Option<String>,
    pub players: Vec<PlayerInfo>,
}

/// All live rooms, keyed by code.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_code(rng: &mut impl Rng) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn clamp_username(username: &str) -> String {
    username.chars().take(MAX_USERNAME_LEN).collect()
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room with the caller as host at seat 0.
    ///
    /// Returns the generated code and the initial player list.
    pub fn create_room(
        &self,
        sid: &str,
        username: &str,
        color_idx: u8,
    ) -> (String, Vec<PlayerInfo>) {
        let mut rooms = self.rooms.write();

        // Regenerate on collision.
        let mut rng = rand::thread_rng();
        let code = loop {
            let candidate = random_code(&mut rng);
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let host = Participant {
            sid: sid.to_string(),
            username: clamp_username(username),
            color_idx,
            seat: 0,
        };
        let room = Room {
            code: code.clone(),
            participants: vec![host],
            host_sid: sid.to_string(),
            queue: Vec::new(),
            current_index: -1,
            is_playing: false,
            paused: false,
        };
        let players = room.players();
        rooms.insert(code.clone(), room);

        log::info!("[Rooms] Room {} created by {}", code, username);
        (code, players)
    }

    /// Adds a participant at the smallest free seat.
    pub fn join_room(
        &self,
        code: &str,
        sid: &str,
        username: &str,
        color_idx: u8,
    ) -> Result<JoinOutcome, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;

        let seat = room.free_seat();
        room.participants.push(Participant {
            sid: sid.to_string(),
            username: clamp_username(username),
            color_idx,
            seat,
        });

        log::info!("[Rooms] {} joined room {} at seat {}", username, code, seat);

        Ok(JoinOutcome {
            seat,
            players: room.players(),
            queue: room.queue.clone(),
            current_index: room.current_index,
        })
    }

    /// Runs the departure flow for a disconnected sid.
    ///
    /// Removes the participant, deletes the room when it empties, and
    /// promotes the first remaining participant when the host left.
    /// Returns `None` when the sid was in no room.
    pub fn remove_participant(&self, sid: &str) -> Option<Departure> {
        let mut rooms = self.rooms.write();

        let code = rooms
            .iter()
            .find(|(_, room)| room.participants.iter().any(|p| p.sid == sid))
            .map(|(code, _)| code.clone())?;

        let room = rooms.get_mut(&code).expect("room present by construction");
        let idx = room
            .participants
            .iter()
            .position(|p| p.sid == sid)
            .expect("participant present by construction");
        let departed = room.participants.remove(idx);

        if room.participants.is_empty() {
            rooms.remove(&code);
            log::info!("[Rooms] Room {} deleted (no users left)", code);
            return Some(Departure {
                room_code: code,
                username: departed.username,
                room_deleted: true,
                promoted_host: None,
                players: Vec::new(),
            });
        }

        let promoted_host = if room.host_sid == sid {
            let new_host = room.participants[0].sid.clone();
            room.host_sid = new_host.clone();
            log::info!("[Rooms] Host left room {}, promoted {}", code, new_host);
            Some(new_host)
        } else {
            None
        };

        Some(Departure {
            room_code: code,
            username: departed.username,
            room_deleted: false,
            promoted_host,
            players: room.players(),
        })
    }

    /// Replaces the room's queue (already cover-restored) and returns the
    /// stored copy for broadcasting.
    pub fn set_queue(&self, code: &str, queue: Vec<Track>) -> Result<Vec<Track>, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        room.queue = queue;
        Ok(room.queue.clone())
    }

    /// Appends one track to the queue and returns the whole queue.
    pub fn append_to_queue(&self, code: &str, track: Track) -> Result<Vec<Track>, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        room.queue.push(track);
        Ok(room.queue.clone())
    }

    /// Stores a client-synced current index verbatim.
    pub fn set_current_index(&self, code: &str, index: i64) -> Result<(), RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        room.current_index = index;
        Ok(())
    }

    /// Selects a queue entry for playback.
    ///
    /// Validates the index, updates `current_index`, and returns the track
    /// for the engine to load.
    pub fn play_song(&self, code: &str, index: usize) -> Result<Track, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        if index >= room.queue.len() {
            return Err(RoomError::IndexOutOfRange {
                index,
                len: room.queue.len(),
            });
        }
        room.current_index = index as i64;
        room.is_playing = true;
        room.paused = false;
        Ok(room.queue[index].clone())
    }

    /// Marks or unmarks the room paused.
    pub fn set_paused(&self, code: &str, paused: bool) -> Result<(), RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        room.paused = paused;
        room.is_playing = !paused;
        Ok(())
    }

    /// True when the room exists and is paused (chunk requests are dropped).
    #[must_use]
    pub fn is_paused(&self, code: &str) -> bool {
        self.rooms.read().get(code).map_or(false, |r| r.paused)
    }

    /// True when a room with this code is live.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.rooms.read().contains_key(code)
    }

    /// Sids of every participant in the room.
    #[must_use]
    pub fn members(&self, code: &str) -> Vec<String> {
        self.rooms
            .read()
            .get(code)
            .map(|r| r.participants.iter().map(|p| p.sid.clone()).collect())
            .unwrap_or_default()
    }

    /// Sids of every participant except `sid`.
    #[must_use]
    pub fn members_except(&self, code: &str, sid: &str) -> Vec<String> {
        self.rooms
            .read()
            .get(code)
            .map(|r| {
                r.participants
                    .iter()
                    .filter(|p| p.sid != sid)
                    .map(|p| p.sid.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The room a sid currently sits in, if any.
    #[must_use]
    pub fn room_of(&self, sid: &str) -> Option<String> {
        self.rooms
            .read()
            .iter()
            .find(|(_, room)| room.participants.iter().any(|p| p.sid == sid))
            .map(|(code, _)| code.clone())
    }

    /// Player list for `players_updated` broadcasts.
    #[must_use]
    pub fn players(&self, code: &str) -> Vec<PlayerInfo> {
        self.rooms
            .read()
            .get(code)
            .map(|r| r.players())
            .unwrap_or_default()
    }

    /// Number of live rooms (health endpoint).
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Snapshot of a room (tests and diagnostics).
    #[must_use]
    pub fn snapshot(&self, code: &str) -> Option<Room> {
        self.rooms.read().get(code).cloned()
    }
}
