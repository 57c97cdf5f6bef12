//! WebSocket handler for the sync bus.
//!
//! One handler task per client. Inbound events are dispatched under the
//! shared event lock so that, per room, mutations and their broadcasts form
//! a single total order; outbound events drain from the peer's bus channel.
//! The server never originates state on its own: every broadcast is the
//! consequence of a received client event or a completed acquisition.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine as _;
use futures::sink::SinkExt;
use futures::stream::StreamExt;

use crate::acquire::{AcquireError, ProbeOutcome};
use crate::error::ErrorCode;
use crate::protocol::{ClientEvent, ServerEvent, UrlStatus};
use crate::rooms::RoomError;

use super::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main per-connection loop.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let conn = state.connections.register();
    let sid = conn.sid().to_string();
    let cancel_token = conn.cancel_token().clone();
    let mut outbound = state.bus.register(&sid);

    loop {
        tokio::select! {
            // Graceful-shutdown force close
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", sid);
                break;
            }
            // Inbound client events
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => dispatch(&state, &sid, event).await,
                            Err(e) => {
                                log::debug!("[WS] Unparseable event from {}: {}", sid, e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Outbound events routed by the bus
            maybe_event = outbound.recv() => {
                match maybe_event {
                    Some(event) => {
                        let Some(json) = event.to_wire() else { continue };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Departure flow: stop routing to this peer, then run the room-side
    // cleanup under the event lock like any other transition.
    state.bus.unregister(&sid);
    let _guard = state.event_lock.lock().await;
    run_departure(&state, &sid);
}

/// Applies one client event. Caller context: handler task; the event lock
/// is taken here so no two handlers interleave a room transition.
async fn dispatch(state: &AppState, sid: &str, event: ClientEvent) {
    let _guard = state.event_lock.lock().await;

    match event {
        ClientEvent::CreateRoom {
            username,
            color_idx,
        } => handle_create_room(state, sid, &username, color_idx),

        ClientEvent::JoinRoom {
            room_code,
            username,
            color_idx,
        } => handle_join_room(state, sid, &room_code, &username, color_idx),

        ClientEvent::AddUrlToQueue { room_code, url } => {
            handle_add_url(state, sid, &room_code, &url);
        }

        ClientEvent::SyncQueue { room_code, queue } => {
            if !require_room(state, sid, &room_code) {
                return;
            }
            let restored = state.library.restore_cover_art(queue);
            match state.rooms.set_queue(&room_code, restored) {
                Ok(stored) => {
                    log::info!(
                        "[WS] Queue for room {} replaced by {} ({} songs)",
                        room_code,
                        sid,
                        stored.len()
                    );
                    broadcast(
                        state,
                        &room_code,
                        ServerEvent::QueueSynced {
                            queue: stored,
                            updated_by: sid.to_string(),
                        },
                    );
                }
                Err(e) => send_room_error(state, sid, &e),
            }
        }

        ClientEvent::SyncCurrentIndex {
            room_code,
            current_idx,
        } => match state.rooms.set_current_index(&room_code, current_idx) {
            Ok(()) => broadcast(
                state,
                &room_code,
                ServerEvent::CurrentIndexSynced {
                    room_code: room_code.clone(),
                    current_idx,
                    updated_by: sid.to_string(),
                },
            ),
            Err(e) => send_room_error(state, sid, &e),
        },

        ClientEvent::PlaySong {
            room_code,
            song_index,
        } => handle_play_song(state, sid, &room_code, song_index),

        ClientEvent::PauseStream {
            room_code,
            song_index,
            position,
        } => match state.rooms.set_paused(&room_code, true) {
            Ok(()) => {
                log::info!("[WS] Room {} paused at {:.2}s", room_code, position);
                broadcast(
                    state,
                    &room_code,
                    ServerEvent::StreamPaused {
                        room_code: room_code.clone(),
                        song_index,
                        position,
                    },
                );
            }
            Err(e) => send_room_error(state, sid, &e),
        },

        ClientEvent::ResumeStream {
            room_code,
            song_index,
            position,
        } => match state.rooms.set_paused(&room_code, false) {
            Ok(()) => {
                log::info!("[WS] Room {} resumed at {:.2}s", room_code, position);
                broadcast(
                    state,
                    &room_code,
                    ServerEvent::StreamResumed {
                        room_code: room_code.clone(),
                        song_index,
                        position,
                    },
                );
            }
            Err(e) => send_room_error(state, sid, &e),
        },

        ClientEvent::SeekStream {
            room_code,
            song_index,
            position,
        } => {
            if !require_room(state, sid, &room_code) {
                return;
            }
            match state.engine.seek(&room_code, position) {
                Some(chunk) => {
                    log::info!(
                        "[WS] Room {} seeked to {:.2}s (chunk {})",
                        room_code,
                        position,
                        chunk
                    );
                }
                None => {
                    log::warn!("[WS] Seek in room {} with no loaded buffer", room_code);
                }
            }
            // Echo to every client so they converge on the same chunk index.
            broadcast(
                state,
                &room_code,
                ServerEvent::StreamSeeked {
                    room_code: room_code.clone(),
                    song_index,
                    position,
                },
            );
        }

        ClientEvent::RequestAudioChunk {
            room_code,
            chunk_index,
        } => handle_chunk_request(state, sid, &room_code, chunk_index),

        ClientEvent::UserTalkingState {
            room_code,
            username,
            is_talking,
        } => {
            let others = state.rooms.members_except(&room_code, sid);
            state.bus.send_to_all(
                &others,
                &ServerEvent::UserTalkingUpdate {
                    username,
                    is_talking,
                },
            );
        }

        ClientEvent::VoiceData { data } => {
            // Opaque passthrough to the rest of the sender's room.
            if let Some(room_code) = state.rooms.room_of(sid) {
                let others = state.rooms.members_except(&room_code, sid);
                state
                    .bus
                    .send_to_all(&others, &ServerEvent::VoiceData { data });
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn handle_create_room(state: &AppState, sid: &str, username: &str, color_idx: u8) {
    let (room_code, players) = state.rooms.create_room(sid, username, color_idx);
    state.bus.unicast(
        sid,
        ServerEvent::RoomCreated {
            room_code: room_code.clone(),
        },
    );
    broadcast(state, &room_code, ServerEvent::PlayersUpdated { players });
}

fn handle_join_room(state: &AppState, sid: &str, room_code: &str, username: &str, color_idx: u8) {
    let outcome = match state.rooms.join_room(room_code, sid, username, color_idx) {
        Ok(outcome) => outcome,
        Err(e) => {
            send_room_error(state, sid, &e);
            return;
        }
    };

    broadcast(
        state,
        room_code,
        ServerEvent::UserJoined {
            username: username.to_string(),
            color_idx,
            position_idx: outcome.seat,
        },
    );

    // The joiner gets the room snapshot: queue, selected index, roster.
    state.bus.unicast(
        sid,
        ServerEvent::QueueUpdated {
            queue: outcome.queue,
        },
    );
    state.bus.unicast(
        sid,
        ServerEvent::CurrentIndexSynced {
            room_code: room_code.to_string(),
            current_idx: outcome.current_index,
            updated_by: "server".to_string(),
        },
    );
    state.bus.unicast(
        sid,
        ServerEvent::RoomJoined {
            room_code: room_code.to_string(),
            players: outcome.players.clone(),
        },
    );

    broadcast(
        state,
        room_code,
        ServerEvent::PlayersUpdated {
            players: outcome.players,
        },
    );
}

/// Runs the acquisition pipeline for one submitted URL.
///
/// The dedup decision happens inline; an actual download is spawned so the
/// bus keeps flowing, and its completion re-enters through the event lock.
/// Emission order is fixed: `url_processing` (download only), then the
/// queue mutation broadcast, then the `url_processed` ack.
fn handle_add_url(state: &AppState, sid: &str, room_code: &str, url: &str) {
    if !require_room(state, sid, room_code) {
        return;
    }

    log::info!("[WS] Processing URL for room {}: {}", room_code, url);

    match state.acquirer.probe(url) {
        Err(e) => send_acquire_error(state, sid, &e),
        Ok(ProbeOutcome::Cached(track)) => {
            append_and_broadcast(state, room_code, track.clone(), sid);
            state.bus.unicast(
                sid,
                ServerEvent::UrlProcessed {
                    status: UrlStatus::Success,
                    message: "Song already in library".to_string(),
                    song: Some(track),
                },
            );
        }
        Ok(ProbeOutcome::NeedsDownload { song_id }) => {
            state.bus.unicast(
                sid,
                ServerEvent::UrlProcessing {
                    message: "Downloading song...".to_string(),
                },
            );

            let state = state.clone();
            let sid = sid.to_string();
            let room_code = room_code.to_string();
            let url = url.to_string();
            tokio::spawn(async move {
                let result = state.acquirer.download(&url, &song_id).await;

                // Commit like any other event: serialized with the bus.
                let _guard = state.event_lock.lock().await;
                match result {
                    Ok(track) => {
                        // The room may have emptied while the download ran;
                        // the library keeps the entry regardless.
                        if state.rooms.contains(&room_code) {
                            append_and_broadcast(&state, &room_code, track.clone(), &sid);
                        }
                        state.bus.unicast(
                            &sid,
                            ServerEvent::UrlProcessed {
                                status: UrlStatus::Success,
                                message: "Song downloaded and added to queue".to_string(),
                                song: Some(track),
                            },
                        );
                    }
                    Err(e) => send_acquire_error(&state, &sid, &e),
                }
            });
        }
    }
}

fn handle_play_song(state: &AppState, sid: &str, room_code: &str, song_index: usize) {
    // Load the PCM before committing the index so a decode failure leaves
    // the room's position unchanged.
    let track = match state.rooms.snapshot(room_code) {
        Some(room) => {
            // Both clients race to auto-play the same index; the first one
            // engaged the stream, later duplicates are no-ops.
            if room.is_playing && room.current_index == song_index as i64 {
                log::debug!(
                    "[WS] play_song {} for room {} already active, ignoring",
                    song_index,
                    room_code
                );
                return;
            }
            match room.queue.get(song_index) {
                Some(track) => track.clone(),
                None => {
                    log::warn!(
                        "[WS] play_song index {} out of range for room {} (queue {})",
                        song_index,
                        room_code,
                        room.queue.len()
                    );
                    return;
                }
            }
        }
        None => {
            send_room_error(state, sid, &RoomError::NotFound(room_code.to_string()));
            return;
        }
    };

    let total_chunks = match state.engine.load(room_code, &track) {
        Ok(total) => total,
        Err(e) => {
            log::error!("[WS] Failed to load {:?}: {}", track.title, e);
            state.bus.unicast(
                sid,
                ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            );
            return;
        }
    };

    if let Err(e) = state.rooms.play_song(room_code, song_index) {
        // Queue changed between snapshot and commit; treat as out-of-range.
        log::warn!("[WS] play_song commit failed for room {}: {}", room_code, e);
        return;
    }

    broadcast(
        state,
        room_code,
        ServerEvent::SongStarted {
            room_code: room_code.to_string(),
            song_index,
            song: track.clone(),
        },
    );
    broadcast(
        state,
        room_code,
        ServerEvent::AudioStreamReady {
            room_code: room_code.to_string(),
            song: track,
            total_chunks,
        },
    );
}

fn handle_chunk_request(state: &AppState, sid: &str, room_code: &str, chunk_index: usize) {
    // Pause policy lives here, not in the engine: a paused room serves
    // nothing until resumed.
    if state.rooms.is_paused(room_code) {
        log::debug!(
            "[WS] Room {} is paused, ignoring chunk request {}",
            room_code,
            chunk_index
        );
        return;
    }

    match state.engine.serve(room_code, chunk_index) {
        Some(chunk) => {
            let audio_data = base64::engine::general_purpose::STANDARD.encode(&chunk);
            state.bus.unicast(
                sid,
                ServerEvent::AudioChunk {
                    room_code: room_code.to_string(),
                    chunk_index,
                    audio_data,
                },
            );
        }
        None => {
            log::debug!(
                "[WS] No chunk {} available for room {}",
                chunk_index,
                room_code
            );
        }
    }
}

/// Departure flow shared by disconnect and force-close.
fn run_departure(state: &AppState, sid: &str) {
    let Some(departure) = state.rooms.remove_participant(sid) else {
        return;
    };

    if departure.room_deleted {
        state.engine.unload(&departure.room_code);
        return;
    }

    broadcast(
        state,
        &departure.room_code,
        ServerEvent::UserLeft {
            username: departure.username.clone(),
        },
    );
    broadcast(
        state,
        &departure.room_code,
        ServerEvent::PlayersUpdated {
            players: departure.players.clone(),
        },
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn broadcast(state: &AppState, room_code: &str, event: ServerEvent) {
    let members = state.rooms.members(room_code);
    state.bus.send_to_all(&members, &event);
}

/// Appends one acquired track and broadcasts the resulting queue.
fn append_and_broadcast(state: &AppState, room_code: &str, track: crate::library::Track, sid: &str) {
    match state.rooms.append_to_queue(room_code, track) {
        Ok(queue) => broadcast(
            state,
            room_code,
            ServerEvent::QueueSynced {
                queue,
                updated_by: sid.to_string(),
            },
        ),
        Err(e) => log::warn!("[WS] Could not append to queue: {}", e),
    }
}

/// Checks room existence, unicasting the standard error when missing.
fn require_room(state: &AppState, sid: &str, room_code: &str) -> bool {
    if state.rooms.contains(room_code) {
        return true;
    }
    send_room_error(state, sid, &RoomError::NotFound(room_code.to_string()));
    false
}

fn send_room_error(state: &AppState, sid: &str, error: &RoomError) {
    if matches!(error, RoomError::IndexOutOfRange { .. }) {
        // Dropped with a log, never echoed to the room.
        log::warn!("[WS] {}", error);
        return;
    }
    state.bus.unicast(
        sid,
        ServerEvent::Error {
            code: error.code().to_string(),
            message: "Room not found".to_string(),
        },
    );
}

fn send_acquire_error(state: &AppState, sid: &str, error: &AcquireError) {
    log::warn!("[WS] URL processing failed: {}", error);
    state.bus.unicast(
        sid,
        ServerEvent::UrlProcessed {
            status: UrlStatus::Error,
            message: error.user_message().to_string(),
            song: None,
        },
    );
}
