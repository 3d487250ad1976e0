//! Remote resources: HEAD probes and resumable downloads.

mod download;
mod fetch;

pub use download::{file_from_uri, transfer_command, DownloadStream, Downloader, DEFAULT_FILE_NAME};
pub use fetch::{content_length, fetch, Response};
