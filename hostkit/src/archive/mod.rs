//! Archive inspection and extraction.
//!
//! Formats are recognised by file name only. A listing command produces the
//! manifest; extraction progress is measured against it by watching the
//! listed files appear on disk.

mod extract;
mod kind;
mod manifest;
mod parser;

pub use extract::{Archives, ExtractionStream};
pub use kind::ArchiveKind;
pub use manifest::{inspect, ArchiveManifest, ManifestEntry};
pub use parser::{ListingParser, SevenZipParser, TarParser, ZipParser};
