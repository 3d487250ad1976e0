//! Archive format detection and per-format commands.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::parser::{ListingParser, SevenZipParser, TarParser, ZipParser};
use crate::shell;

/// A supported archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Tar,
    Zip,
    SevenZip,
}

impl ArchiveKind {
    /// Classify a path by its file name suffix.
    ///
    /// Matching ignores case. Anything unrecognised is `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();

        if name.ends_with(".zip") {
            return Some(Self::Zip);
        }
        if name.ends_with(".7z") {
            return Some(Self::SevenZip);
        }
        if name.ends_with(".tar") {
            return Some(Self::Tar);
        }

        // `.tar.<ext>` with a single non-empty extension after it.
        let (stem, ext) = name.rsplit_once('.')?;
        if !ext.is_empty() && stem.ends_with(".tar") {
            return Some(Self::Tar);
        }
        None
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::SevenZip => "sevenzip",
        }
    }

    /// Command printing the archive's verbose listing.
    pub fn list_command(self, archive: &Path) -> String {
        let archive = shell::quote_path(archive);
        match self {
            Self::Tar => format!("tar -tvf {archive}"),
            Self::Zip => format!("unzip -v {archive}"),
            Self::SevenZip => format!("7z l {archive}"),
        }
    }

    /// Command extracting the archive into `dir`, or the working directory.
    pub fn extract_command(self, archive: &Path, dir: Option<&Path>) -> String {
        let archive = shell::quote_path(archive);
        let Some(dir) = dir else {
            return match self {
                Self::Tar => format!("tar -xvf {archive}"),
                Self::Zip => format!("unzip -o {archive}"),
                Self::SevenZip => format!("7z x {archive}"),
            };
        };

        let quoted = shell::quote_path(dir);
        let extract = match self {
            Self::Tar => format!("tar -xvf {archive} -C {quoted}"),
            Self::Zip => format!("unzip -o {archive} -d {quoted}"),
            Self::SevenZip => format!("7z x {archive} -o{quoted}"),
        };
        format!("mkdir -p {quoted} && {extract}")
    }

    /// Parser for this format's listing output.
    pub fn parser(self) -> &'static dyn ListingParser {
        match self {
            Self::Tar => &TarParser,
            Self::Zip => &ZipParser,
            Self::SevenZip => &SevenZipParser,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(name: &str) -> Option<ArchiveKind> {
        ArchiveKind::from_path(Path::new(name))
    }

    #[test]
    fn test_from_path() {
        assert_eq!(kind("x.zip"), Some(ArchiveKind::Zip));
        assert_eq!(kind("x.tar.gz"), Some(ArchiveKind::Tar));
        assert_eq!(kind("x.7z"), Some(ArchiveKind::SevenZip));
        assert_eq!(kind("x.rar"), None);
    }

    #[test]
    fn test_from_path_variants() {
        assert_eq!(kind("/data/release.tar"), Some(ArchiveKind::Tar));
        assert_eq!(kind("release.tar.xz"), Some(ArchiveKind::Tar));
        assert_eq!(kind("RELEASE.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(kind("release.tar."), None);
        assert_eq!(kind("release.tgz"), None);
        assert_eq!(kind("notes.txt"), None);
        assert_eq!(kind(""), None);
    }

    #[test]
    fn test_list_commands() {
        let path = Path::new("/a/b c.zip");
        assert_eq!(ArchiveKind::Zip.list_command(path), r#"unzip -v "/a/b c.zip""#);
        assert_eq!(ArchiveKind::Tar.list_command(path), r#"tar -tvf "/a/b c.zip""#);
        assert_eq!(ArchiveKind::SevenZip.list_command(path), r#"7z l "/a/b c.zip""#);
    }

    #[test]
    fn test_extract_commands() {
        let archive = Path::new("a.7z");
        assert_eq!(ArchiveKind::SevenZip.extract_command(archive, None), r#"7z x "a.7z""#);
        assert_eq!(
            ArchiveKind::SevenZip.extract_command(archive, Some(Path::new("out"))),
            r#"mkdir -p "out" && 7z x "a.7z" -o"out""#
        );
        assert_eq!(
            ArchiveKind::Tar.extract_command(Path::new("a.tar.gz"), Some(Path::new("out"))),
            r#"mkdir -p "out" && tar -xvf "a.tar.gz" -C "out""#
        );
        assert_eq!(
            ArchiveKind::Zip.extract_command(Path::new("a.zip"), Some(Path::new("out"))),
            r#"mkdir -p "out" && unzip -o "a.zip" -d "out""#
        );
    }
}
