//! Common utilities and helper functions

pub mod retry;

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref NON_SLUG_RE: Regex = Regex::new(r"[^a-z0-9]+").expect("Invalid regex pattern");
}

/// Lowercase, dash-separated form of `text` safe for file and folder names
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_SLUG_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Truncate text to a maximum number of characters
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("launch:d-7"), "launch-d-7");
        assert_eq!(slugify("weekly@2025-03-12:d-0"), "weekly-2025-03-12-d-0");
        assert_eq!(slugify("  Hello, World!  "), "hello-world");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("very long text here", 10), "very lo...");
        assert_eq!(truncate_chars("日本語のテキスト", 5), "日本...");
    }
}
