//! Client session: the local mirror of room state plus the control emitter.
//!
//! The mirror discipline is strict: control methods only *emit* sync events;
//! the mutation is applied when the server's broadcast comes back through
//! [`JamSession::handle_event`]. That way every participant, including the
//! one who pressed the button, observes the same total order.
//!
//! UI code talks to the session through method calls; the session talks back
//! through the one-way [`SessionObserver`] interface. No back-references.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use ember_core::library::Track;
use ember_core::protocol::{ClientEvent, PlayerInfo, ServerEvent, UrlStatus};
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::player::{PlayClock, PlayerCommand};

/// Debounce window for slider seeks.
const SEEK_DEBOUNCE: Duration = Duration::from_millis(500);

/// Sink for outgoing sync events (the transport, or a recorder in tests).
pub trait ControlSink: Send + Sync {
    /// Queues one event for the server.
    fn emit(&self, event: ClientEvent);
}

/// One-way notifications from the session to whatever renders it.
#[allow(unused_variables)]
pub trait SessionObserver: Send + Sync {
    fn on_room_entered(&self, room_code: &str, is_host: bool) {}
    fn on_queue_changed(&self, queue: &[Track]) {}
    fn on_play_state_changed(&self, is_playing: bool) {}
    fn on_players_changed(&self, players: &[PlayerInfo]) {}
    fn on_track_changed(&self, index: i64, track: Option<&Track>) {}
    fn on_download_state(&self, downloading: bool, message: &str) {}
    fn on_user_notice(&self, message: &str) {}
    fn on_error(&self, code: &str, message: &str) {}
}

#[derive(Default)]
struct SessionState {
    room_code: Option<String>,
    username: String,
    is_host: bool,
    queue: Vec<Track>,
    current_index: i64,
    is_playing: bool,
    players: Vec<PlayerInfo>,
    clock: PlayClock,
}

impl SessionState {
    fn current_track(&self) -> Option<&Track> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|i| self.queue.get(i))
    }
}

/// Per-client session state machine.
pub struct JamSession {
    emitter: Arc<dyn ControlSink>,
    observer: Arc<dyn SessionObserver>,
    player: Sender<PlayerCommand>,
    state: Mutex<SessionState>,
    seek_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JamSession {
    /// Builds a session with fresh (empty) mirrored state.
    pub fn new(
        emitter: Arc<dyn ControlSink>,
        observer: Arc<dyn SessionObserver>,
        player: Sender<PlayerCommand>,
    ) -> Self {
        Self {
            emitter,
            observer,
            player,
            state: Mutex::new(SessionState {
                current_index: -1,
                ..SessionState::default()
            }),
            seek_task: Mutex::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control emitters (one sync event per user action)
    // ─────────────────────────────────────────────────────────────────────

    /// Asks the server for a new room with us as host.
    pub fn create_room(&self, username: &str, color_idx: u8) {
        self.state.lock().username = username.to_string();
        self.emitter.emit(ClientEvent::CreateRoom {
            username: username.to_string(),
            color_idx,
        });
    }

    /// Asks to join an existing room by code.
    pub fn join_room(&self, room_code: &str, username: &str, color_idx: u8) {
        self.state.lock().username = username.to_string();
        self.emitter.emit(ClientEvent::JoinRoom {
            room_code: room_code.to_uppercase(),
            username: username.to_string(),
            color_idx,
        });
    }

    /// Submits a track URL for download and enqueueing.
    pub fn add_url(&self, url: &str) {
        let Some(room_code) = self.state.lock().room_code.clone() else {
            log::warn!("[Session] add_url with no room joined");
            return;
        };
        self.emitter.emit(ClientEvent::AddUrlToQueue {
            room_code,
            url: url.to_string(),
        });
    }

    /// Emits pause or resume depending on the mirrored play state.
    pub fn toggle_play(&self) {
        let state = self.state.lock();
        let Some(room_code) = state.room_code.clone() else {
            return;
        };
        let Ok(song_index) = usize::try_from(state.current_index) else {
            return;
        };
        let position = state.clock.position();
        let event = if state.is_playing {
            ClientEvent::PauseStream {
                room_code,
                song_index,
                position,
            }
        } else {
            ClientEvent::ResumeStream {
                room_code,
                song_index,
                position,
            }
        };
        drop(state);
        self.emitter.emit(event);
    }

    /// Selects a queue entry for the whole room.
    pub fn play_song(&self, song_index: usize) {
        let state = self.state.lock();
        let Some(room_code) = state.room_code.clone() else {
            return;
        };
        if song_index >= state.queue.len() {
            return;
        }
        drop(state);
        self.emitter
            .emit(ClientEvent::PlaySong { room_code, song_index });
    }

    /// Advances to the next queue entry, if any.
    pub fn next_song(&self) {
        let next = {
            let state = self.state.lock();
            let next = state.current_index + 1;
            (next >= 0 && (next as usize) < state.queue.len()).then_some(next as usize)
        };
        if let Some(idx) = next {
            self.play_song(idx);
        }
    }

    /// Goes back to the previous queue entry, if any.
    pub fn prev_song(&self) {
        let prev = {
            let state = self.state.lock();
            (state.current_index > 0).then_some((state.current_index - 1) as usize)
        };
        if let Some(idx) = prev {
            self.play_song(idx);
        }
    }

    /// Removes one queue entry, shipping the new queue cover-stripped.
    pub fn remove_from_queue(&self, index: usize) {
        let (room_code, queue) = {
            let state = self.state.lock();
            let Some(room_code) = state.room_code.clone() else {
                return;
            };
            if index >= state.queue.len() {
                return;
            }
            let mut queue = state.queue.clone();
            queue.remove(index);
            (room_code, queue)
        };
        self.emit_queue(room_code, queue);
    }

    /// Shuffles the queue, keeping the playing track at the front.
    pub fn shuffle_queue(&self) {
        let (room_code, queue) = {
            let state = self.state.lock();
            let Some(room_code) = state.room_code.clone() else {
                return;
            };
            if state.queue.len() < 2 {
                return;
            }
            let mut rng = rand::thread_rng();
            let queue = match usize::try_from(state.current_index) {
                Ok(current) if current < state.queue.len() => {
                    let mut rest: Vec<Track> = state
                        .queue
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != current)
                        .map(|(_, t)| t.clone())
                        .collect();
                    rest.shuffle(&mut rng);
                    let mut queue = vec![state.queue[current].clone()];
                    queue.extend(rest);
                    queue
                }
                _ => {
                    let mut queue = state.queue.clone();
                    queue.shuffle(&mut rng);
                    queue
                }
            };
            (room_code, queue)
        };
        self.emit_queue(room_code, queue);
    }

    /// Debounced seek: successive calls inside the window collapse into one
    /// `seek_stream`. The local clock moves optimistically right away; no
    /// chunks are requested until the broadcast comes back.
    ///
    /// Each call replaces the pending emission, so the event that finally
    /// fires carries the last requested position.
    pub fn seek(&self, position: f64) {
        let (room_code, song_index) = {
            let mut state = self.state.lock();
            let Some(room_code) = state.room_code.clone() else {
                return;
            };
            let Ok(song_index) = usize::try_from(state.current_index) else {
                return;
            };
            state.clock.set_position(position);
            (room_code, song_index)
        };

        let emitter = Arc::clone(&self.emitter);
        let mut task = self.seek_task.lock();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(SEEK_DEBOUNCE).await;
            log::debug!("[Session] Debounced seek to {:.2}s", position);
            emitter.emit(ClientEvent::SeekStream {
                room_code,
                song_index,
                position,
            });
        }));
    }

    /// Reports the local voice-activity state to the room.
    pub fn set_talking(&self, is_talking: bool) {
        let state = self.state.lock();
        let Some(room_code) = state.room_code.clone() else {
            return;
        };
        let username = state.username.clone();
        drop(state);
        self.emitter.emit(ClientEvent::UserTalkingState {
            room_code,
            username,
            is_talking,
        });
    }

    fn emit_queue(&self, room_code: String, queue: Vec<Track>) {
        let queue = queue.iter().map(Track::stripped_for_wire).collect();
        self.emitter.emit(ClientEvent::SyncQueue { room_code, queue });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mirror: applying server broadcasts
    // ─────────────────────────────────────────────────────────────────────

    /// Applies one server event to the mirrored state.
    pub fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::RoomCreated { room_code } => {
                let mut state = self.state.lock();
                state.room_code = Some(room_code.clone());
                state.is_host = true;
                drop(state);
                self.observer.on_room_entered(&room_code, true);
            }

            ServerEvent::RoomJoined { room_code, players } => {
                let mut state = self.state.lock();
                state.room_code = Some(room_code.clone());
                state.players = players.clone();
                drop(state);
                self.observer.on_room_entered(&room_code, false);
                self.observer.on_players_changed(&players);
            }

            ServerEvent::UserJoined { username, .. } => {
                self.observer
                    .on_user_notice(&format!("{username} joined the room"));
            }

            ServerEvent::UserLeft { username } => {
                self.observer
                    .on_user_notice(&format!("{username} left the room"));
            }

            ServerEvent::PlayersUpdated { players } => {
                self.state.lock().players = players.clone();
                self.observer.on_players_changed(&players);
            }

            ServerEvent::UrlProcessing { message } => {
                self.observer.on_download_state(true, &message);
            }

            ServerEvent::UrlProcessed {
                status, message, ..
            } => {
                if status == UrlStatus::Error {
                    self.observer.on_error("url_processed", &message);
                }
                self.observer.on_download_state(false, &message);
            }

            ServerEvent::QueueUpdated { queue } => {
                // Snapshot for a fresh joiner; no auto-play here.
                self.state.lock().queue = queue.clone();
                self.observer.on_queue_changed(&queue);
            }

            ServerEvent::QueueSynced { queue, .. } => self.apply_queue_sync(queue),

            ServerEvent::CurrentIndexSynced { current_idx, .. } => {
                let mut state = self.state.lock();
                state.current_index = current_idx;
                let track = state.current_track().cloned();
                drop(state);
                self.observer.on_track_changed(current_idx, track.as_ref());
            }

            ServerEvent::SongStarted {
                song_index, song, ..
            } => {
                let mut state = self.state.lock();
                state.current_index = song_index as i64;
                state.is_playing = true;
                drop(state);
                self.observer.on_track_changed(song_index as i64, Some(&song));
                self.observer.on_play_state_changed(true);
            }

            ServerEvent::AudioStreamReady {
                room_code,
                total_chunks,
                ..
            } => {
                {
                    let mut state = self.state.lock();
                    state.clock.resume_at(0.0);
                    state.is_playing = true;
                }
                let _ = self.player.send(PlayerCommand::Start {
                    room_code,
                    total_chunks,
                });
            }

            ServerEvent::StreamPaused { position, .. } => {
                {
                    let mut state = self.state.lock();
                    state.is_playing = false;
                    state.clock.pause();
                    state.clock.set_position(position);
                }
                let _ = self.player.send(PlayerCommand::Pause);
                self.observer.on_play_state_changed(false);
            }

            ServerEvent::StreamResumed { position, .. } => {
                {
                    let mut state = self.state.lock();
                    state.is_playing = true;
                    state.clock.resume_at(position);
                }
                let _ = self.player.send(PlayerCommand::Resume { position });
                self.observer.on_play_state_changed(true);
            }

            ServerEvent::StreamSeeked { position, .. } => {
                {
                    let mut state = self.state.lock();
                    if state.is_playing {
                        state.clock.resume_at(position);
                    } else {
                        state.clock.set_position(position);
                    }
                }
                let _ = self.player.send(PlayerCommand::Seek { position });
            }

            ServerEvent::AudioChunk {
                chunk_index,
                audio_data,
                ..
            } => match base64::engine::general_purpose::STANDARD.decode(&audio_data) {
                Ok(pcm) => {
                    let _ = self.player.send(PlayerCommand::Chunk { chunk_index, pcm });
                }
                Err(e) => log::warn!("[Session] Undecodable audio chunk: {}", e),
            },

            ServerEvent::UserTalkingUpdate {
                username,
                is_talking,
            } => {
                if is_talking {
                    self.observer.on_user_notice(&format!("{username} is talking"));
                }
            }

            ServerEvent::VoiceData { .. } => {
                // Voice playback is out of scope for this client.
            }

            ServerEvent::Error { code, message } => {
                self.observer.on_error(&code, &message);
            }
        }
    }

    /// Queue replacement: apply, enforce the empty-queue index reset, and
    /// auto-play the first track when a queue appears with nothing active.
    ///
    /// The reset is client-enforced: the server stores whatever index the
    /// room last synced, so an emptied queue is followed by a
    /// `sync_current_index(-1)` emission.
    fn apply_queue_sync(&self, queue: Vec<Track>) {
        let (should_autoplay, reset_room) = {
            let mut state = self.state.lock();
            state.queue = queue.clone();
            let mut reset_room = None;
            if state.queue.is_empty() {
                if state.current_index != -1 {
                    reset_room = state.room_code.clone();
                }
                state.current_index = -1;
            }
            (
                !state.queue.is_empty() && state.current_index < 0,
                reset_room,
            )
        };
        self.observer.on_queue_changed(&queue);

        if let Some(room_code) = reset_room {
            self.emitter.emit(ClientEvent::SyncCurrentIndex {
                room_code,
                current_idx: -1,
            });
        }

        if should_autoplay {
            log::info!("[Session] Queue became non-empty with no active song, auto-playing");
            self.play_song(0);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mirrored-state accessors
    // ─────────────────────────────────────────────────────────────────────

    /// The joined room's code, once the server confirmed it.
    #[must_use]
    pub fn room_code(&self) -> Option<String> {
        self.state.lock().room_code.clone()
    }

    /// True when this client created the room.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.state.lock().is_host
    }

    /// Mirrored queue snapshot.
    #[must_use]
    pub fn queue(&self) -> Vec<Track> {
        self.state.lock().queue.clone()
    }

    /// Mirrored selected index (`-1` = none).
    #[must_use]
    pub fn current_index(&self) -> i64 {
        self.state.lock().current_index
    }

    /// Mirrored play state.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing
    }

    /// Local playback position in seconds.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.state.lock().clock.position()
    }

    /// Mirrored participant roster.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerInfo> {
        self.state.lock().players.clone()
    }

    /// Stops the audio output loop (used when leaving the session).
    pub fn shutdown(&self) {
        let _ = self.player.send(PlayerCommand::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    struct NoopObserver;

    impl SessionObserver for NoopObserver {}

    struct RecordingSink {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<ClientEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ControlSink for RecordingSink {
        fn emit(&self, event: ClientEvent) {
            self.events.lock().push(event);
        }
    }

    fn track(id: &str) -> Track {
        Track {
            song_id: id.into(),
            title: id.into(),
            name: id.into(),
            artist: "a".into(),
            album: "b".into(),
            length_sec: 180,
            url: format!("https://open.spotify.com/track/{id}"),
            filepath: format!("downloads/a - {id}.mp3").into(),
            cover_image: Some("aW1n".into()),
            has_cover_image: false,
        }
    }

    fn session() -> (Arc<JamSession>, Arc<RecordingSink>, Receiver<PlayerCommand>) {
        let sink = RecordingSink::new();
        let (player_tx, player_rx) = channel();
        let session = Arc::new(JamSession::new(
            sink.clone(),
            Arc::new(NoopObserver),
            player_tx,
        ));
        (session, sink, player_rx)
    }

    fn joined_session() -> (Arc<JamSession>, Arc<RecordingSink>, Receiver<PlayerCommand>) {
        let (session, sink, player_rx) = session();
        session.handle_event(ServerEvent::RoomCreated {
            room_code: "ABC123".into(),
        });
        sink.take();
        (session, sink, player_rx)
    }

    #[test]
    fn control_methods_do_not_mutate_locally() {
        let (session, sink, _player) = joined_session();
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1"), track("t2")],
            updated_by: "sid-9".into(),
        });
        sink.take();

        // Emitting play does not move the mirror; only the broadcast does.
        session.play_song(1);
        assert!(matches!(
            sink.take().as_slice(),
            [ClientEvent::PlaySong { song_index: 1, .. }]
        ));
        assert_eq!(session.current_index(), -1);

        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 1,
            song: track("t2"),
        });
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn queue_sync_triggers_auto_play_once() {
        let (session, sink, _player) = joined_session();

        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1")],
            updated_by: "sid-2".into(),
        });
        assert!(matches!(
            sink.take().as_slice(),
            [ClientEvent::PlaySong { song_index: 0, .. }]
        ));

        // Song becomes active; further queue syncs do not re-trigger.
        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 0,
            song: track("t1"),
        });
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1"), track("t2")],
            updated_by: "sid-2".into(),
        });
        assert!(sink.take().is_empty());
    }

    #[test]
    fn empty_queue_sync_resets_index_and_syncs_it() {
        let (session, sink, _player) = joined_session();
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1")],
            updated_by: "x".into(),
        });
        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 0,
            song: track("t1"),
        });
        assert_eq!(session.current_index(), 0);
        sink.take();

        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![],
            updated_by: "x".into(),
        });
        assert_eq!(session.current_index(), -1);
        // The reset is reported back so the server's stored index follows.
        assert!(matches!(
            sink.take().as_slice(),
            [ClientEvent::SyncCurrentIndex { current_idx: -1, .. }]
        ));

        // Already reset: a second empty sync emits nothing.
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![],
            updated_by: "x".into(),
        });
        assert!(sink.take().is_empty());
    }

    #[test]
    fn toggle_play_emits_pause_with_clock_position() {
        let (session, sink, _player) = joined_session();
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1")],
            updated_by: "x".into(),
        });
        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 0,
            song: track("t1"),
        });
        session.handle_event(ServerEvent::AudioStreamReady {
            room_code: "ABC123".into(),
            song: track("t1"),
            total_chunks: 100,
        });
        sink.take();

        session.toggle_play();
        match sink.take().as_slice() {
            [ClientEvent::PauseStream {
                song_index,
                position,
                ..
            }] => {
                assert_eq!(*song_index, 0);
                assert!(*position >= 0.0);
            }
            other => panic!("expected pause_stream, got {:?}", other),
        }

        // Mirror still playing until the broadcast lands.
        assert!(session.is_playing());
        session.handle_event(ServerEvent::StreamPaused {
            room_code: "ABC123".into(),
            song_index: 0,
            position: 12.3,
        });
        assert!(!session.is_playing());

        session.toggle_play();
        assert!(matches!(
            sink.take().as_slice(),
            [ClientEvent::ResumeStream { position, .. }] if (*position - 12.3).abs() < 0.05
        ));
    }

    #[test]
    fn pause_freezes_clock_at_broadcast_position() {
        let (session, _sink, _player) = joined_session();
        session.handle_event(ServerEvent::StreamPaused {
            room_code: "ABC123".into(),
            song_index: 0,
            position: 12.3,
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!((session.position() - 12.3).abs() < f64::EPSILON);
    }

    #[test]
    fn resume_and_seek_drive_player_commands() {
        let (session, _sink, player) = joined_session();

        session.handle_event(ServerEvent::StreamResumed {
            room_code: "ABC123".into(),
            song_index: 0,
            position: 12.3,
        });
        assert!(matches!(
            player.try_recv().unwrap(),
            PlayerCommand::Resume { position } if (position - 12.3).abs() < f64::EPSILON
        ));

        session.handle_event(ServerEvent::StreamSeeked {
            room_code: "ABC123".into(),
            song_index: 0,
            position: 60.0,
        });
        assert!(matches!(
            player.try_recv().unwrap(),
            PlayerCommand::Seek { position } if position == 60.0
        ));
    }

    #[test]
    fn audio_chunk_is_decoded_for_the_player() {
        let (session, _sink, player) = joined_session();
        let pcm: Vec<u8> = vec![1, 2, 3, 4];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&pcm);

        session.handle_event(ServerEvent::AudioChunk {
            room_code: "ABC123".into(),
            chunk_index: 7,
            audio_data: encoded,
        });

        match player.try_recv().unwrap() {
            PlayerCommand::Chunk { chunk_index, pcm: got } => {
                assert_eq!(chunk_index, 7);
                assert_eq!(got, pcm);
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn remove_from_queue_ships_stripped_tracks() {
        let (session, sink, _player) = joined_session();
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1"), track("t2")],
            updated_by: "x".into(),
        });
        sink.take();

        session.remove_from_queue(0);
        match sink.take().as_slice() {
            [ClientEvent::SyncQueue { queue, .. }] => {
                assert_eq!(queue.len(), 1);
                assert_eq!(queue[0].song_id, "t2");
                assert!(queue[0].cover_image.is_none());
                assert!(queue[0].has_cover_image);
            }
            other => panic!("expected sync_queue, got {:?}", other),
        }
    }

    #[test]
    fn shuffle_keeps_current_track_in_front() {
        let (session, sink, _player) = joined_session();
        let queue: Vec<Track> = (0..8).map(|i| track(&format!("t{i}"))).collect();
        session.handle_event(ServerEvent::QueueSynced {
            queue: queue.clone(),
            updated_by: "x".into(),
        });
        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 3,
            song: track("t3"),
        });
        sink.take();

        session.shuffle_queue();
        match sink.take().as_slice() {
            [ClientEvent::SyncQueue { queue: shipped, .. }] => {
                assert_eq!(shipped.len(), 8);
                assert_eq!(shipped[0].song_id, "t3");
                let mut ids: Vec<_> = shipped.iter().map(|t| t.song_id.clone()).collect();
                ids.sort();
                let mut expected: Vec<_> = (0..8).map(|i| format!("t{i}")).collect();
                expected.sort();
                assert_eq!(ids, expected);
            }
            other => panic!("expected sync_queue, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn seeks_within_window_collapse_to_one_emission() {
        let (session, sink, _player) = joined_session();
        session.handle_event(ServerEvent::QueueSynced {
            queue: vec![track("t1")],
            updated_by: "x".into(),
        });
        session.handle_event(ServerEvent::SongStarted {
            room_code: "ABC123".into(),
            song_index: 0,
            song: track("t1"),
        });
        sink.take();

        session.seek(10.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.seek(30.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.seek(60.0);

        // Optimistic clock move, no emission yet.
        assert!((session.position() - 60.0).abs() < f64::EPSILON);
        assert!(sink.take().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;

        match sink.take().as_slice() {
            [ClientEvent::SeekStream { position, .. }] => assert_eq!(*position, 60.0),
            other => panic!("expected one seek_stream, got {:?}", other),
        }
    }
}
