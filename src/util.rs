//! Shared utility functions used across the pipeline.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Alphabet for short content hashes: lowercase letters and digits.
const HASH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// 8-character lowercase-alphanumeric digest of arbitrary bytes.
///
/// Used for content-addressed patch names and entity signatures. Two inputs
/// with the same bytes always map to the same string, so parallel workers
/// producing identical diffs collapse onto the same artifact file.
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest[..8]
        .iter()
        .map(|b| HASH_ALPHABET[(*b as usize) % HASH_ALPHABET.len()] as char)
        .collect()
}

/// Full hex digest, used for image-build cache keys.
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Flatten a repo-relative file path into a single directory component,
/// e.g. `src/lib/util.py` becomes `src__lib__util.py`.
pub fn file_as_dir(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '\\'], "__")
}

/// Find the largest valid UTF-8 char boundary at or before `pos`.
///
/// Use when truncating strings by byte position to avoid panicking on
/// multi-byte characters.
pub fn floor_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut i = pos;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Shorten `text` to roughly `max_tokens` (4 bytes per token estimate) by
/// keeping the head and tail halves. Returns the input unchanged when it
/// already fits.
pub fn maybe_shorten(text: &str, max_tokens: usize) -> String {
    let max_bytes = max_tokens.saturating_mul(4);
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let half = max_bytes / 2;
    let head_end = floor_char_boundary(text, half);
    let tail_start = floor_char_boundary(text, text.len() - half);
    format!("{}\n\n(...)\n\n{}", &text[..head_end], &text[tail_start..])
}

/// True when two strings differ only in whitespace.
pub fn whitespace_only_change(a: &str, b: &str) -> bool {
    let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    strip(a) == strip(b)
}
