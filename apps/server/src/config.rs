//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the sync-bus server to.
    /// Override: `EMBER_BIND_ADDR`
    pub bind_addr: IpAddr,

    /// Port to bind the sync-bus server to.
    /// Override: `EMBER_BIND_PORT`
    pub bind_port: u16,

    /// Directory the downloader writes audio files into.
    /// Override: `EMBER_DOWNLOADS_DIR`
    pub downloads_dir: PathBuf,

    /// Path of the library index file.
    /// Override: `EMBER_LIBRARY_INDEX`
    pub library_index: PathBuf,

    /// Downloader executable.
    /// Override: `EMBER_DOWNLOADER`
    pub downloader_program: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = ember_core::Config::default();
        Self {
            bind_addr: core.bind_addr,
            bind_port: core.bind_port,
            downloads_dir: core.downloads_dir,
            library_index: core.library_index,
            downloader_program: core.downloader_program,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EMBER_BIND_ADDR") {
            if let Ok(addr) = val.parse() {
                self.bind_addr = addr;
            }
        }

        if let Ok(val) = std::env::var("EMBER_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("EMBER_DOWNLOADS_DIR") {
            self.downloads_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("EMBER_LIBRARY_INDEX") {
            self.library_index = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("EMBER_DOWNLOADER") {
            self.downloader_program = val;
        }
    }

    /// Converts to ember-core's Config type.
    pub fn to_core_config(&self) -> ember_core::Config {
        ember_core::Config {
            bind_addr: self.bind_addr,
            bind_port: self.bind_port,
            downloads_dir: self.downloads_dir.clone(),
            library_index: self.library_index.clone(),
            downloader_program: self.downloader_program.clone(),
        }
    }
}
