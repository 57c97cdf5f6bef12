//! Ember Core - shared library for Ember Jams.
//!
//! This crate provides the core functionality for Ember Jams, a LAN
//! collaborative music-listening service: clients join a named room, enqueue
//! tracks by streaming-service URL, and the server streams the decoded PCM
//! to every participant in lockstep. It is used by both the headless server
//! binary and the terminal client.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`]: wire events and canonical audio constants
//! - [`library`]: disk-backed, content-addressed track store
//! - [`acquire`]: URL → downloaded asset → library entry pipeline
//! - [`engine`]: per-room PCM buffers and chunk serving
//! - [`rooms`]: authoritative room state (participants, queue, playback flags)
//! - [`api`]: WebSocket sync bus and HTTP surface
//! - [`error`]: error-code mapping for wire payloads
//!
//! # Abstraction Traits
//!
//! The external downloader is reached only through
//! [`acquire::TrackFetcher`], so the pipeline can be exercised without
//! spawning a subprocess.

#![warn(clippy::all)]

pub mod acquire;
pub mod api;
pub mod bootstrap;
pub mod engine;
pub mod error;
pub mod library;
pub mod protocol;
pub mod rooms;
pub mod state;

// Re-export commonly used types at the crate root
pub use acquire::{AcquireError, AcquireOutcome, Acquirer, SpotdlFetcher, TrackFetcher, UrlRules};
pub use api::{start_server, AppState, ConnectionRegistry, ServerError, SyncBus};
pub use bootstrap::{bootstrap_services, bootstrap_services_with_fetcher, JamServices};
pub use engine::{EngineError, PcmEngine};
pub use error::ErrorCode;
pub use library::{LibraryError, MediaLibrary, Track};
pub use protocol::{ClientEvent, PlayerInfo, ServerEvent, UrlStatus};
pub use rooms::{Participant, Room, RoomError, RoomRegistry};
pub use state::Config;
