//! Service construction and wiring.
//!
//! One entry point builds every service the server needs and hands back a
//! container the binary turns into an [`AppState`]. Keeping construction
//! here means binaries stay thin and tests can assemble partial stacks.

use std::sync::Arc;

use thiserror::Error;

use crate::acquire::{Acquirer, SpotdlFetcher, TrackFetcher, UrlRules};
use crate::api::{AppState, ConnectionRegistry, SyncBus};
use crate::engine::PcmEngine;
use crate::library::{LibraryError, MediaLibrary};
use crate::rooms::RoomRegistry;
use crate::state::Config;

/// Errors raised while bootstrapping services.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Library index could not be opened.
    #[error("failed to open library: {0}")]
    Library(#[from] LibraryError),

    /// Downloads directory could not be created.
    #[error("failed to prepare downloads directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Container for all bootstrapped services.
pub struct JamServices {
    pub library: Arc<MediaLibrary>,
    pub acquirer: Arc<Acquirer>,
    pub engine: Arc<PcmEngine>,
    pub rooms: Arc<RoomRegistry>,
    pub bus: Arc<SyncBus>,
    pub connections: Arc<ConnectionRegistry>,
}

impl JamServices {
    /// Builds the API-layer state handle over these services.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState {
            library: Arc::clone(&self.library),
            acquirer: Arc::clone(&self.acquirer),
            engine: Arc::clone(&self.engine),
            rooms: Arc::clone(&self.rooms),
            bus: Arc::clone(&self.bus),
            connections: Arc::clone(&self.connections),
            event_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Signals every connection to close (graceful shutdown).
    pub fn shutdown(&self) {
        self.connections.close_all();
    }
}

/// Bootstraps all services with the real downloader.
pub fn bootstrap_services(config: &Config) -> Result<JamServices, BootstrapError> {
    let fetcher = Arc::new(SpotdlFetcher::with_program(&config.downloader_program));
    bootstrap_services_with_fetcher(config, fetcher)
}

/// Bootstraps all services with an explicit fetcher (tests, alternate tools).
pub fn bootstrap_services_with_fetcher(
    config: &Config,
    fetcher: Arc<dyn TrackFetcher>,
) -> Result<JamServices, BootstrapError> {
    let library = Arc::new(MediaLibrary::open(&config.library_index)?);
    let acquirer = Arc::new(Acquirer::new(
        Arc::clone(&library),
        fetcher,
        &config.downloads_dir,
        UrlRules::default(),
    )?);

    Ok(JamServices {
        library,
        acquirer,
        engine: Arc::new(PcmEngine::new()),
        rooms: Arc::new(RoomRegistry::new()),
        bus: Arc::new(SyncBus::new()),
        connections: Arc::new(ConnectionRegistry::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_creates_downloads_dir_and_empty_library() {
        let dir = tempdir().unwrap();
        let config = Config {
            downloads_dir: dir.path().join("downloads"),
            library_index: dir.path().join("music_data.json"),
            ..Config::default()
        };
        let services = bootstrap_services(&config).unwrap();
        assert!(config.downloads_dir.is_dir());
        assert!(services.library.is_empty());
        assert_eq!(services.rooms.room_count(), 0);
    }
}
