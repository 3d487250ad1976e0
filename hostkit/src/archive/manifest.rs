//! Archive manifests built from listing output.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::kind::ArchiveKind;
use crate::error::{Error, Result};
use crate::host::{ExecMode, Host};

/// One file listed in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    compressed: Option<u64>,
    uncompressed: u64,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, compressed: Option<u64>, uncompressed: u64) -> Self {
        Self {
            path: path.into(),
            compressed,
            uncompressed,
        }
    }

    /// Path relative to the extraction directory.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stored size; only zip listings report it.
    pub fn compressed(&self) -> Option<u64> {
        self.compressed
    }

    pub fn uncompressed(&self) -> u64 {
        self.uncompressed
    }
}

/// Parsed contents of an archive. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveManifest {
    kind: ArchiveKind,
    total_compressed: Option<u64>,
    total_uncompressed: Option<u64>,
    files: Vec<ManifestEntry>,
}

impl ArchiveManifest {
    /// Build a manifest, summing the entry sizes.
    ///
    /// A total is only present when at least one entry carries it.
    pub fn new(kind: ArchiveKind, files: Vec<ManifestEntry>) -> Self {
        let total_uncompressed = (!files.is_empty())
            .then(|| files.iter().map(ManifestEntry::uncompressed).sum::<u64>());
        let total_compressed = files
            .iter()
            .filter_map(ManifestEntry::compressed)
            .fold(None, |total: Option<u64>, size| Some(total.unwrap_or(0) + size));

        Self {
            kind,
            total_compressed,
            total_uncompressed,
            files,
        }
    }

    /// Parse listing output with the format's parser.
    pub fn parse(kind: ArchiveKind, listing: &str) -> Self {
        Self::new(kind, kind.parser().parse(listing))
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn total_compressed(&self) -> Option<u64> {
        self.total_compressed
    }

    pub fn total_uncompressed(&self) -> Option<u64> {
        self.total_uncompressed
    }

    pub fn files(&self) -> &[ManifestEntry] {
        &self.files
    }
}

/// List an archive and parse its manifest.
///
/// Resolves `None` for unsupported file types; only a failing listing
/// command is an error.
pub async fn inspect(host: &dyn Host, archive: &Path) -> Result<Option<ArchiveManifest>> {
    let Some(kind) = ArchiveKind::from_path(archive) else {
        debug!(archive = %archive.display(), "not a supported archive");
        return Ok(None);
    };

    let command = kind.list_command(archive);
    let output = host
        .execute(&command, ExecMode::Foreground)
        .await
        .map_err(|source| Error::Spawn { command, source })?;

    let manifest = ArchiveManifest::parse(kind, &output.stdout);
    debug!(
        archive = %archive.display(),
        kind = %kind,
        files = manifest.files().len(),
        total = manifest.total_uncompressed(),
        "parsed archive manifest"
    );
    Ok(Some(manifest))
}

/// Resolve an entry's path against the extraction directory.
pub(crate) fn entry_path(base: &Path, entry: &ManifestEntry) -> PathBuf {
    base.join(entry.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::scripted::ScriptedHost;

    const ZIP_LISTING: &str = "\
    1000  Defl:N      400  60% 2024-01-02 03:04 1a2b3c4d  a.txt
    2000  Defl:N      900  55% 2024-01-02 03:04 1a2b3c4e  b.txt
";

    #[test]
    fn test_totals() {
        let manifest = ArchiveManifest::parse(ArchiveKind::Zip, ZIP_LISTING);
        assert_eq!(manifest.total_uncompressed(), Some(3000));
        assert_eq!(manifest.total_compressed(), Some(1300));
        assert_eq!(manifest.files().len(), 2);
    }

    #[test]
    fn test_empty_manifest_has_no_totals() {
        let manifest = ArchiveManifest::parse(ArchiveKind::Tar, "");
        assert_eq!(manifest.total_uncompressed(), None);
        assert_eq!(manifest.total_compressed(), None);
        assert!(manifest.files().is_empty());
    }

    #[test]
    fn test_tar_has_no_compressed_total() {
        let manifest = ArchiveManifest::new(
            ArchiveKind::Tar,
            vec![ManifestEntry::new("a", None, 5), ManifestEntry::new("b", None, 7)],
        );
        assert_eq!(manifest.total_uncompressed(), Some(12));
        assert_eq!(manifest.total_compressed(), None);
    }

    #[test]
    fn test_serializes_kind_lowercase() {
        let manifest = ArchiveManifest::new(ArchiveKind::SevenZip, Vec::new());
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["kind"], "sevenzip");
    }

    #[tokio::test]
    async fn test_inspect_runs_listing_command() {
        let host = ScriptedHost::new();
        host.respond("unzip -v", ZIP_LISTING);

        let manifest = inspect(&host, Path::new("/dl/bundle.zip"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(host.commands(), vec![r#"unzip -v "/dl/bundle.zip""#]);
        assert_eq!(manifest.kind(), ArchiveKind::Zip);
        assert_eq!(manifest.files()[1].path(), "b.txt");
    }

    #[tokio::test]
    async fn test_inspect_unsupported_is_none() {
        let host = ScriptedHost::new();
        assert!(inspect(&host, Path::new("x.rar")).await.unwrap().is_none());
        assert!(host.commands().is_empty());
    }
}
