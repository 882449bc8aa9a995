//! Artifact marker line protocol.
//!
//! Scripts register produced files by printing a reserved-prefix line on
//! stdout:
//!
//! ```text
//! ARTIFACT_SAVED:<stored_filename>:<size_bytes>:<original_filename>
//! ```
//!
//! A structured-log envelope may precede the prefix (loggers commonly wrap
//! print output), but everything from the prefix to end-of-line must parse
//! exactly. Filenames carrying path separators are rejected so a marker can
//! never point outside the artifacts directory.

use std::sync::LazyLock;

use regex::Regex;

/// Reserved line prefix emitted by the script-side support library.
pub const ARTIFACT_MARKER_PREFIX: &str = "ARTIFACT_SAVED:";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    // stored filename (no `:`), byte size, original filename; anchored to
    // end-of-line so trailing junk invalidates the marker.
    Regex::new(r"ARTIFACT_SAVED:([^:]+):(\d+):([^:]+)$").expect("valid regex")
});

/// Metadata parsed from one artifact marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMarker {
    /// Unique on-disk filename inside the artifacts directory.
    pub stored_filename: String,
    /// Filename the script originally asked for.
    pub original_filename: String,
    /// Size reported by the script, in bytes.
    pub size_bytes: u64,
}

impl ArtifactMarker {
    /// Parse a single stdout line, returning the marker if present.
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = MARKER_RE.captures(line.trim_end())?;
        let stored = caps.get(1)?.as_str().trim();
        let size_bytes: u64 = caps.get(2)?.as_str().parse().ok()?;
        let original = caps.get(3)?.as_str().trim();

        if !is_safe_filename(stored) || !is_safe_filename(original) {
            return None;
        }

        Some(Self {
            stored_filename: stored.to_string(),
            original_filename: original.to_string(),
            size_bytes,
        })
    }
}

/// A filename is safe when it has no path separators and is not a dot entry.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
