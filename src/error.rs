//! Error types

use std::io;

use thiserror::Error;

use crate::stream::Direction;

/// Errors surfaced by stream lifecycle, loading and recording operations
#[derive(Error, Debug)]
pub enum Error {
    /// The backend could not open a stream
    #[error("failed to open {direction} stream: {reason}")]
    Open {
        /// Which way the stream was meant to flow
        direction: Direction,
        /// Backend-provided description
        reason: String,
    },

    /// The backend refused to start a stream
    #[error("failed to start stream: {0}")]
    Start(String),

    /// A stream operation other than open/start failed
    #[error("stream error: {0}")]
    Stream(String),

    /// The backend has no way to perform the requested operation
    #[error("operation not supported by this backend")]
    Unsupported,

    /// An operation that needs an open stream was called without one
    #[error("no stream is open")]
    NotOpen,

    /// The device went away
    #[error("audio device disconnected")]
    Disconnected,

    /// A blocking read produced nothing before its deadline
    #[error("timed out waiting for audio data")]
    Timeout,

    /// The WAV container could not be parsed or written
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// The data decoded fine but cannot be used
    #[error("unsupported sample format: {0}")]
    Format(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Asynchronous failure reported by a running stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The device backing the stream is gone
    #[error("device disconnected")]
    Disconnected,

    /// Anything else the backend reports
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for fallible operations in this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
