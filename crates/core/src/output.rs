//! Captured output truncation.

/// Marker appended when captured output exceeds the size cap.
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Cap `text` at `max_bytes`, appending [`TRUNCATION_MARKER`] when cut.
///
/// The cut point is moved back to the nearest UTF-8 character boundary so
/// the result is always valid text.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = text[..cut].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
