//! Listing parsers, one per archive format.
//!
//! Each parser turns the text printed by the format's listing command into
//! manifest entries. Lines that do not look like file rows (headers,
//! separators, totals) are skipped.

use std::sync::LazyLock;

use regex::Regex;

use super::manifest::ManifestEntry;

/// Turns listing command output into manifest entries.
pub trait ListingParser: Send + Sync {
    fn parse(&self, listing: &str) -> Vec<ManifestEntry>;
}

/// GNU `tar -tvf`: `-rw-r--r-- user/group 1000 2024-01-02 03:04 dir/a.txt`
static TAR_GNU: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([-dlbcpsh])[-rwxsStT]{9}\S*\s+\S+\s+(\d+)\s+\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}(?::\d{2})?\s+(.+)$",
    )
    .expect("valid tar listing pattern")
});

/// bsdtar `tar -tvf`: `-rw-r--r--  0 user group 1000 Jan  2 03:04 dir/a.txt`
static TAR_BSD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([-dlbcpsh])[-rwxsStT]{9}\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s+[A-Z][a-z]{2}\s+\d{1,2}\s+(?:\d{2}:\d{2}|\d{4})\s+(.+)$",
    )
    .expect("valid bsdtar listing pattern")
});

/// `unzip -v`: length, method, size, ratio, date, time, crc, name.
static ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+\S+\s+(\d+)\s+-?\d+%\s+[\d-]+\s+[\d:]+\s+[0-9a-fA-F]{8}  (.+)$")
        .expect("valid zip listing pattern")
});

/// `7z l` row: date, time, attributes, size, optional compressed size, name.
static SEVEN_ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} [A-Z.]{5} +(\d+) +(\d*) +(.+)$")
        .expect("valid 7z listing pattern")
});

/// Separator rule framing the file rows of a `7z l` listing.
const SEVEN_ZIP_RULE: &str = "-------------------";

fn lines(listing: &str) -> impl Iterator<Item = &str> {
    listing.lines().map(|line| line.trim_end_matches('\r'))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TarParser;

impl ListingParser for TarParser {
    fn parse(&self, listing: &str) -> Vec<ManifestEntry> {
        lines(listing)
            .filter_map(|line| TAR_GNU.captures(line).or_else(|| TAR_BSD.captures(line)))
            .filter_map(|caps| {
                let size = caps[2].parse().ok()?;
                let mut path = &caps[3];
                match &caps[1] {
                    "l" => path = path.split_once(" -> ").map_or(path, |(link, _)| link),
                    "h" => path = path.split_once(" link to ").map_or(path, |(link, _)| link),
                    _ => {}
                }
                Some(ManifestEntry::new(path, None, size))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipParser;

impl ListingParser for ZipParser {
    fn parse(&self, listing: &str) -> Vec<ManifestEntry> {
        lines(listing)
            .filter_map(|line| ZIP.captures(line))
            .filter_map(|caps| {
                let uncompressed = caps[1].parse().ok()?;
                let compressed = caps[2].parse().ok()?;
                Some(ManifestEntry::new(&caps[3], Some(compressed), uncompressed))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipParser;

impl ListingParser for SevenZipParser {
    fn parse(&self, listing: &str) -> Vec<ManifestEntry> {
        let all: Vec<&str> = lines(listing).collect();
        let rules: Vec<usize> = all
            .iter()
            .enumerate()
            .filter(|(_, line)| line.starts_with(SEVEN_ZIP_RULE))
            .map(|(index, _)| index)
            .collect();

        // Rows live between the first and the last rule.
        let (Some(&first), Some(&last)) = (rules.first(), rules.last()) else {
            return Vec::new();
        };
        if first == last {
            return Vec::new();
        }

        all[first + 1..last]
            .iter()
            .filter_map(|line| SEVEN_ZIP.captures(line))
            .filter_map(|caps| {
                let size = caps[1].parse().ok()?;
                Some(ManifestEntry::new(&caps[3], None, size))
            })
            .collect()
    }
}
