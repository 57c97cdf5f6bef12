//! Centralized error types for the Ember Jams core library.
//!
//! Each subsystem defines its own error enum next to the code that raises it
//! (`LibraryError` in [`crate::library`], `AcquireError` in [`crate::acquire`],
//! and so on). This module provides the [`ErrorCode`] trait that maps every
//! error to the machine-readable code carried in wire `error` payloads, plus
//! the conversions between subsystem errors.

use crate::acquire::AcquireError;
use crate::engine::EngineError;
use crate::library::LibraryError;
use crate::rooms::RoomError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for wire payloads.
    fn code(&self) -> &'static str;
}

impl ErrorCode for LibraryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Index(_) => "library_unavailable",
        }
    }
}

impl ErrorCode for AcquireError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::UnrecognizedUrl(_) => "unrecognized_url",
            Self::DownloadFailed(_) => "download_failed",
            Self::SidecarMissing(_) => "sidecar_missing",
            Self::AudioFileMissing(_) => "audio_file_missing",
            Self::TagRead(_) => "tag_read_failed",
            Self::Library(e) => e.code(),
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Open(_) => "audio_file_unreadable",
            Self::Probe(_) | Self::NoAudioTrack => "audio_format_unsupported",
            Self::Decode(_) => "decode_failed",
            Self::Resample(_) => "resample_failed",
        }
    }
}

impl ErrorCode for RoomError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "room_not_found",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
        }
    }
}
