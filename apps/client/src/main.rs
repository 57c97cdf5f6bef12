//! Ember Client - terminal client for Ember Jams sessions.
//!
//! Connects to a server, creates or joins a room, and mirrors the shared
//! queue while streaming the room's audio to the local output device.
//! Transport controls are plain line commands on stdin.

mod player;
mod session;
mod transport;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ember_core::library::Track;
use ember_core::protocol::{PlayerInfo, COLOR_COUNT};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::{ControlSink, JamSession, SessionObserver};

/// Ember Client - join a jam session from the terminal.
#[derive(Parser, Debug)]
#[command(name = "ember-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address (http://host:port).
    #[arg(short, long, default_value = "http://localhost:5000", env = "EMBER_SERVER")]
    server: String,

    /// Create a new room and become its host.
    #[arg(long, conflicts_with = "join")]
    create: bool,

    /// Join an existing room by code.
    #[arg(short, long, value_name = "CODE")]
    join: Option<String>,

    /// Username shown around the campfire (truncated to 6 chars).
    #[arg(short, long)]
    username: String,

    /// Character color index (0-6).
    #[arg(long, default_value_t = 0)]
    color: u8,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "EMBER_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

/// Observer that renders session changes as terminal lines.
struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn on_room_entered(&self, room_code: &str, is_host: bool) {
        if is_host {
            println!("Room created: {room_code} (share this code)");
        } else {
            println!("Joined room {room_code}");
        }
    }

    fn on_queue_changed(&self, queue: &[Track]) {
        println!("Queue now has {} song(s)", queue.len());
    }

    fn on_play_state_changed(&self, is_playing: bool) {
        println!("{}", if is_playing { "Playing" } else { "Paused" });
    }

    fn on_players_changed(&self, players: &[PlayerInfo]) {
        let names: Vec<String> = players
            .iter()
            .map(|p| format!("{}@seat{}", p.username, p.position))
            .collect();
        println!("Around the fire: {}", names.join(", "));
    }

    fn on_track_changed(&self, index: i64, track: Option<&Track>) {
        if let Some(track) = track {
            println!("Now playing [{}]: {} - {}", index, track.artist, track.title);
        }
    }

    fn on_download_state(&self, _downloading: bool, message: &str) {
        println!("{message}");
    }

    fn on_user_notice(&self, message: &str) {
        println!("* {message}");
    }

    fn on_error(&self, code: &str, message: &str) {
        eprintln!("error [{code}]: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    if args.color >= COLOR_COUNT {
        bail!("--color must be 0..{}", COLOR_COUNT - 1);
    }
    if !args.create && args.join.is_none() {
        bail!("pass --create to host a room or --join CODE to join one");
    }

    let (transport, mut events) = transport::connect(&args.server)
        .await
        .context("Failed to connect to server")?;
    let emitter: Arc<dyn ControlSink> = Arc::new(transport);

    // The audio output loop owns the device on its own thread.
    let (player_tx, player_rx) = std::sync::mpsc::channel();
    {
        let emitter = Arc::clone(&emitter);
        std::thread::spawn(move || player::run_player(player_rx, emitter));
    }

    let session = Arc::new(JamSession::new(
        emitter,
        Arc::new(TerminalObserver),
        player_tx,
    ));

    if args.create {
        session.create_room(&args.username, args.color);
    } else if let Some(code) = &args.join {
        session.join_room(code, &args.username, args.color);
    }

    println!("Type 'help' for commands.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => session.handle_event(event),
                    None => {
                        eprintln!("Disconnected from server");
                        break;
                    }
                }
            }
            maybe_line = stdin.next_line() => {
                match maybe_line? {
                    Some(line) => {
                        if !run_command(&session, line.trim()) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}

/// Executes one REPL command; returns false to quit.
fn run_command(session: &Arc<JamSession>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let arg = parts.next();

    match command {
        "add" => match arg {
            Some(url) => session.add_url(url),
            None => println!("usage: add <track-url>"),
        },
        "play" => match arg.and_then(|a| a.parse().ok()) {
            Some(index) => session.play_song(index),
            None => println!("usage: play <queue-index>"),
        },
        "p" | "pause" | "resume" => session.toggle_play(),
        "n" | "next" => session.next_song(),
        "b" | "prev" => session.prev_song(),
        "seek" => match arg.and_then(|a| a.parse().ok()) {
            Some(secs) => session.seek(secs),
            None => println!("usage: seek <seconds>"),
        },
        "shuffle" => session.shuffle_queue(),
        "remove" => match arg.and_then(|a| a.parse().ok()) {
            Some(index) => session.remove_from_queue(index),
            None => println!("usage: remove <queue-index>"),
        },
        "q" | "queue" => print_queue(session),
        "status" => print_status(session),
        "mic" => match arg {
            Some("on") => session.set_talking(true),
            Some("off") => session.set_talking(false),
            _ => println!("usage: mic on|off"),
        },
        "help" => print_help(),
        "quit" | "exit" => {
            session.shutdown();
            return false;
        }
        other => println!("unknown command: {other} (try 'help')"),
    }
    true
}

fn print_status(session: &Arc<JamSession>) {
    match session.room_code() {
        Some(code) if session.is_host() => println!("room {code} (hosting)"),
        Some(code) => println!("room {code}"),
        None => println!("not in a room yet"),
    }
    println!(
        "{} at {:.1}s, song {} of {}",
        if session.is_playing() { "playing" } else { "paused" },
        session.position(),
        session.current_index() + 1,
        session.queue().len()
    );
    for player in session.players() {
        println!("  seat {}: {}", player.position, player.username);
    }
}

fn print_queue(session: &Arc<JamSession>) {
    let queue = session.queue();
    if queue.is_empty() {
        println!("(queue is empty)");
        return;
    }
    let current = session.current_index();
    for (i, track) in queue.iter().enumerate() {
        let marker = if i as i64 == current { ">" } else { " " };
        println!(
            "{marker} {i}: {} - {} ({}s)",
            track.artist, track.title, track.length_sec
        );
    }
}

fn print_help() {
    println!("commands:");
    println!("  add <url>      queue a track by streaming-service URL");
    println!("  play <i>       play queue entry i for the whole room");
    println!("  p              toggle pause/resume");
    println!("  n / b          next / previous track");
    println!("  seek <secs>    seek everyone to a position");
    println!("  shuffle        shuffle the queue (current song stays first)");
    println!("  remove <i>     remove queue entry i");
    println!("  queue          print the shared queue");
    println!("  status         room, position and roster");
    println!("  mic on|off     tell the room whether you are talking");
    println!("  quit           leave the session");
}
