//! External downloader invocation.
//!
//! The downloader is an opaque command-line tool; abstracting it behind
//! [`TrackFetcher`] lets the pipeline be exercised with an in-memory fake
//! and keeps the subprocess details in one place.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::AcquireError;

/// Fetches a track URL into an output directory, leaving an audio file plus
/// a `<job_id>.spotdl` metadata sidecar.
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// Runs the download to completion. The implementation must not block
    /// the async runtime while the tool runs.
    async fn fetch(&self, url: &str, job_id: &str, out_dir: &Path) -> Result<(), AcquireError>;
}

/// The real downloader: invokes `spotdl` as a child process.
pub struct SpotdlFetcher {
    program: String,
}

impl SpotdlFetcher {
    /// Uses `spotdl` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("spotdl")
    }

    /// Uses an explicit program path (useful when the tool is vendored).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SpotdlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackFetcher for SpotdlFetcher {
    async fn fetch(&self, url: &str, job_id: &str, out_dir: &Path) -> Result<(), AcquireError> {
        let sidecar = out_dir.join(format!("{job_id}.spotdl"));

        log::debug!(
            "[Acquire] {} --output {} --format mp3 --save-file {} {}",
            self.program,
            out_dir.display(),
            sidecar.display(),
            url
        );

        let output = Command::new(&self.program)
            .arg("--output")
            .arg(out_dir)
            .arg("--format")
            .arg("mp3")
            .arg("--save-file")
            .arg(&sidecar)
            .arg(url)
            .output()
            .await
            .map_err(|e| {
                AcquireError::DownloadFailed(format!("failed to spawn {}: {e}", self.program))
            })?;

        if !output.status.success() {
            // Best effort: don't leave a half-written sidecar around.
            let _ = std::fs::remove_file(&sidecar);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("downloader exited non-zero")
                .to_string();
            log::warn!("[Acquire] Download failed for {}: {}", url, reason);
            return Err(AcquireError::DownloadFailed(reason));
        }

        Ok(())
    }
}
