//! Audio output loop.
//!
//! A dedicated thread owns the output device. It pulls PCM chunks through
//! the request/response protocol: write chunk `i` to the device, request
//! chunk `i+1`. The device's queue depth provides the backpressure; the
//! next request only goes out once the sink backlog drops below ~1 s.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use ember_core::protocol::{chunk_index_for_position, ClientEvent, CHUNK_SIZE, SAMPLE_RATE};

use crate::session::ControlSink;

/// Sink backlog cap, in queued chunks (~46 ms each, so about one second).
const MAX_QUEUED_CHUNKS: usize = 22;

/// Commands from the session's event mirror to the audio thread.
#[derive(Debug)]
pub enum PlayerCommand {
    /// A new stream is ready; (re)open the device and pull from chunk 0.
    Start {
        room_code: String,
        total_chunks: usize,
    },
    /// One received PCM chunk.
    Chunk { chunk_index: usize, pcm: Vec<u8> },
    /// Suspend requests and device output.
    Pause,
    /// Resume pulling from the chunk containing `position`.
    Resume { position: f64 },
    /// Flush buffered audio and continue from `position`.
    Seek { position: f64 },
    /// Tear the stream down.
    Stop,
}

/// Local play clock: wall-clock driven while playing, frozen while paused.
#[derive(Debug, Default)]
pub struct PlayClock {
    base_position: f64,
    started_at: Option<Instant>,
}

impl PlayClock {
    /// Freezes the clock, accumulating elapsed time into the base.
    pub fn pause(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.base_position += started.elapsed().as_secs_f64();
        }
    }

    /// Jumps to `position`; keeps running if it was running.
    pub fn set_position(&mut self, position: f64) {
        let was_running = self.started_at.is_some();
        self.base_position = position.max(0.0);
        self.started_at = was_running.then(Instant::now);
    }

    /// Jumps to `position` and starts running.
    pub fn resume_at(&mut self, position: f64) {
        self.base_position = position.max(0.0);
        self.started_at = Some(Instant::now());
    }

    /// Current position in seconds.
    #[must_use]
    pub fn position(&self) -> f64 {
        match self.started_at {
            Some(started) => self.base_position + started.elapsed().as_secs_f64(),
            None => self.base_position,
        }
    }
}

/// Converts one wire chunk into f32 samples for the device.
fn chunk_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// One opened output device. The stream handle must stay alive for the
/// sink to produce sound.
struct Output {
    _stream: rodio::OutputStream,
    sink: rodio::Sink,
}

/// Opens the default output device as a mono 44.1 kHz 16-bit sink.
fn open_output() -> Option<Output> {
    use rodio::{stream::OutputStreamBuilder, Sink};

    match OutputStreamBuilder::open_default_stream() {
        Ok(stream) => {
            let sink = Sink::connect_new(stream.mixer());
            Some(Output {
                _stream: stream,
                sink,
            })
        }
        Err(e) => {
            log::error!("[Player] Failed to open audio output: {}", e);
            None
        }
    }
}

/// Runs the output loop until the command channel closes.
///
/// Spawn on a dedicated `std::thread`; the device handle is not `Send` and
/// blocking waits are fine here. A failed device open is logged and retried
/// on the next stream-ready event.
pub fn run_player(commands: Receiver<PlayerCommand>, emitter: std::sync::Arc<dyn ControlSink>) {
    use rodio::buffer::SamplesBuffer;

    let mut output: Option<Output> = None;
    let mut room_code: Option<String> = None;
    let mut next_chunk: usize = 0;
    let mut total_chunks: usize = 0;
    let mut pulling = false;
    // Set when a pull was deferred because the sink backlog was full; the
    // timeout branch issues it once the device drains.
    let mut deferred_pull = false;

    let request = |room: &str, chunk_index: usize| {
        emitter.emit(ClientEvent::RequestAudioChunk {
            room_code: room.to_string(),
            chunk_index,
        });
    };

    loop {
        // Short timeout so the backlog check below keeps running even when
        // no commands arrive.
        let command = match commands.recv_timeout(Duration::from_millis(50)) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match command {
            Some(PlayerCommand::Start {
                room_code: room,
                total_chunks: total,
            }) => {
                // Reopen the device if the last attempt failed.
                if output.is_none() {
                    output = open_output();
                }
                let Some(out) = &output else {
                    log::warn!("[Player] No output device, skipping stream for {}", room);
                    continue;
                };
                log::info!(
                    "[Player] Stream ready for room {} ({} chunks)",
                    room,
                    total
                );
                out.sink.clear();
                out.sink.play();
                next_chunk = 0;
                total_chunks = total;
                pulling = true;
                deferred_pull = false;
                request(&room, 0);
                room_code = Some(room);
            }
            Some(PlayerCommand::Chunk { chunk_index, pcm }) => {
                let Some(out) = &output else { continue };
                if !pulling || chunk_index != next_chunk {
                    // Stale delivery from before a seek/pause; drop it.
                    continue;
                }
                let samples = chunk_to_samples(&pcm);
                out.sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
                next_chunk = chunk_index + 1;

                if pcm.len() < CHUNK_SIZE || next_chunk > total_chunks {
                    log::info!("[Player] Reached end of stream");
                    pulling = false;
                    continue;
                }
                if out.sink.len() < MAX_QUEUED_CHUNKS {
                    if let Some(room) = &room_code {
                        request(room, next_chunk);
                    }
                } else {
                    deferred_pull = true;
                }
            }
            Some(PlayerCommand::Pause) => {
                pulling = false;
                deferred_pull = false;
                if let Some(out) = &output {
                    out.sink.pause();
                }
            }
            Some(PlayerCommand::Resume { position }) => {
                next_chunk = chunk_index_for_position(position);
                pulling = true;
                deferred_pull = false;
                if let Some(out) = &output {
                    out.sink.clear();
                    out.sink.play();
                }
                if let Some(room) = &room_code {
                    request(room, next_chunk);
                }
            }
            Some(PlayerCommand::Seek { position }) => {
                next_chunk = chunk_index_for_position(position);
                deferred_pull = false;
                if let Some(out) = &output {
                    out.sink.clear();
                    if pulling {
                        out.sink.play();
                    }
                }
                if pulling {
                    if let Some(room) = &room_code {
                        request(room, next_chunk);
                    }
                }
            }
            Some(PlayerCommand::Stop) => {
                pulling = false;
                deferred_pull = false;
                if let Some(out) = &output {
                    out.sink.stop();
                }
                room_code = None;
            }
            None => {
                // Backlog drained below the cap while a pull was parked.
                let backlog_ok = output
                    .as_ref()
                    .map_or(false, |out| out.sink.len() < MAX_QUEUED_CHUNKS);
                if pulling && deferred_pull && backlog_ok {
                    deferred_pull = false;
                    if let Some(room) = &room_code {
                        request(room, next_chunk);
                    }
                }
            }
        }
    }

    log::debug!("[Player] Output loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_accumulates_while_running() {
        let mut clock = PlayClock::default();
        clock.resume_at(0.0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(clock.position() >= 0.03);
    }

    #[test]
    fn clock_freezes_on_pause() {
        let mut clock = PlayClock::default();
        clock.resume_at(0.0);
        std::thread::sleep(Duration::from_millis(20));
        clock.pause();
        let frozen = clock.position();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.position(), frozen);
    }

    #[test]
    fn set_position_preserves_run_state() {
        let mut clock = PlayClock::default();
        clock.set_position(12.3);
        assert_eq!(clock.position(), 12.3);
        std::thread::sleep(Duration::from_millis(10));
        // Still frozen: it was not running when positioned.
        assert_eq!(clock.position(), 12.3);

        clock.resume_at(60.0);
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.position() > 60.0);
    }

    #[test]
    fn chunk_conversion_is_little_endian() {
        // 0x0100 = 256, 0xFF7F = 32767
        let pcm = [0x00, 0x01, 0xFF, 0x7F];
        let samples = chunk_to_samples(&pcm);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 256.0 / 32768.0).abs() < f32::EPSILON);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn resume_chunk_matches_shared_formula() {
        assert_eq!(chunk_index_for_position(12.3), 264);
    }
}
