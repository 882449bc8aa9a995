//! Classification of external package-tool diagnostics.
//!
//! The resolver/installer's exit code alone does not reliably signal
//! success or failure, so the engine matches its stderr text against known
//! phrases. Keeping the table here makes the heuristic unit-testable in
//! isolation from process spawning.

/// How a tool failure should be treated by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Network/timeout/TLS class failures; worth retrying with backoff.
    Transient,
    /// Unresolvable package or bad request; retrying can never help.
    Permanent,
    /// Unrecognized diagnostic; retried until the budget is exhausted.
    Unknown,
}

/// Phrases indicating a permanently failing request. Checked first so a
/// message mentioning both (e.g. a resolution error discovered over the
/// network) short-circuits instead of burning retries.
const PERMANENT_PHRASES: &[&str] = &[
    "no solution found",
    "not found in the package registry",
    "no matching distribution",
    "invalid package name",
    "not a valid package or extra name",
    "unsupported requirement",
];

/// Phrases indicating a transient infrastructure failure.
const TRANSIENT_PHRASES: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection closed",
    "could not connect",
    "network",
    "temporary failure",
    "tls",
    "certificate",
    "dns error",
];

/// Classify a diagnostic text from the external package tool.
pub fn classify_diagnostic(text: &str) -> Classification {
    let lowered = text.to_lowercase();

    if PERMANENT_PHRASES.iter().any(|p| lowered.contains(p)) {
        return Classification::Permanent;
    }
    if TRANSIENT_PHRASES.iter().any(|p| lowered.contains(p)) {
        return Classification::Transient;
    }
    Classification::Unknown
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
