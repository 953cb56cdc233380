//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping segments of at most
//! `max_chars` bytes (snapped to UTF-8 character boundaries), preferring to
//! break at a newline when one falls close enough to the computed boundary.
//! Consecutive chunks overlap by `overlap` bytes so that sentences straddling
//! a boundary stay retrievable from at least one chunk.
//!
//! The sequence is deterministic for a given input and parameter pair, which
//! is what makes re-ingestion idempotent: the same document always produces
//! the same batch.

/// How far back from the computed break point a newline is still accepted.
const NEWLINE_WINDOW: usize = 200;

/// Split `text` into trimmed, non-empty, overlapping segments.
///
/// Each window ends `max_chars` bytes after its start (clamped to the input
/// length); a newline inside the trailing [`NEWLINE_WINDOW`] moves the break
/// point back to it. The next window starts `overlap` bytes before the
/// previous end, but never at or before the previous start: the start
/// strictly increases every iteration, so the loop terminates even when
/// `overlap >= max_chars`.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = floor_boundary(text, (start + max_chars).min(len));
        if end <= start {
            // A single character wider than max_chars; take it whole rather
            // than stall.
            end = ceil_boundary(text, start + 1);
        }

        if end < len {
            if let Some(nl) = text[start..end].rfind('\n') {
                let nl_abs = start + nl;
                if nl_abs > start && nl_abs + NEWLINE_WINDOW > end {
                    end = nl_abs;
                }
            }
        }

        let slice = text[start..end].trim();
        if !slice.is_empty() {
            chunks.push(slice.to_string());
        }

        if end >= len {
            break;
        }
        let next = end.saturating_sub(overlap).max(start + 1);
        start = ceil_boundary(text, next);
    }

    chunks
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}
