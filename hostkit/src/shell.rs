//! Shell string escaping.
//!
//! Every value interpolated into a command line goes through [`escape`]:
//! backslashes first, then double quotes, so the result is safe inside a
//! double-quoted shell word.

use std::path::Path;

/// Escape backslashes and double quotes.
pub fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Escape a value and wrap it in double quotes.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value))
}

/// Quote a filesystem path.
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}
