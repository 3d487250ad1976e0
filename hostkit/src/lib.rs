//! Hostkit - background processes, resumable downloads and archive
//! extraction on top of a minimal host command interface.
//!
//! The host only answers requests: run a command, stat a file, read or
//! remove it. It never notifies. Every stream here therefore polls:
//!
//! - [`process::ProcessHandle`] watches a pid and tails its output file
//! - [`network::DownloadStream`] watches the destination file grow
//! - [`archive::ExtractionStream`] watches the manifest's files appear
//!
//! Streams report through replay-safe `start`/`progress`/`finish`/`error`
//! subscriptions (see [`events`]). All waiting goes through a [`ticker::Ticker`]
//! so tests can drive time deterministically.

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod fanin;
pub mod host;
pub mod network;
pub mod process;
pub mod shell;
pub mod ticker;

mod registry;

pub use error::{Error, Result, StreamError};
