//! Core configuration types.
//!
//! The configuration is a plain value owned by the embedding binary and
//! passed into [`crate::bootstrap::bootstrap_services`]; there is no global
//! state anywhere in the library.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the Ember Jams server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind the WS/HTTP server to.
    pub bind_addr: IpAddr,

    /// Port to bind the WS/HTTP server to.
    pub bind_port: u16,

    /// Directory the downloader writes audio files and sidecars into.
    pub downloads_dir: PathBuf,

    /// Path of the library index file.
    pub library_index: PathBuf,

    /// Downloader executable (resolved via `PATH` unless absolute).
    pub downloader_program: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 5000,
            downloads_dir: PathBuf::from("downloads"),
            library_index: PathBuf::from("music_data.json"),
            downloader_program: "spotdl".to_string(),
        }
    }
}

impl Config {
    /// The socket address the server binds.
    #[must_use]
    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.bind_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_docs() {
        let config = Config::default();
        assert_eq!(config.bind_socket_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(config.downloads_dir, PathBuf::from("downloads"));
        assert_eq!(config.library_index, PathBuf::from("music_data.json"));
    }

    #[test]
    fn partial_yaml_like_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"bind_port": 6000}"#).unwrap();
        assert_eq!(config.bind_port, 6000);
        assert_eq!(config.downloader_program, "spotdl");
    }
}
