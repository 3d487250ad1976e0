//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the library's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The host could not launch a command.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A host filesystem or process call failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A configuration file could not be parsed.
    #[error("invalid config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Terminal failure delivered through a stream's `error` channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The archive's file name does not map to a supported format.
    #[error("unsupported archive type: {}", .0.display())]
    UnsupportedArchive(PathBuf),

    /// The listing command for the archive could not be run.
    #[error("could not read manifest of {}: {reason}", path.display())]
    ManifestUnavailable { path: PathBuf, reason: String },

    /// The background process driving the stream could not be launched.
    #[error("failed to launch background process: {0}")]
    Launch(String),
}
