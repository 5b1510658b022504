//! UTF-8 safe string previews.
//!
//! Slicing by byte index panics inside multibyte characters; these helpers
//! count chars instead.

/// The first `n` characters of `s`.
pub fn prefix_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Up to `n` characters of `s`, with `...` appended when something was cut.
pub fn preview(s: &str, n: usize) -> String {
    let mut prefix = prefix_chars(s, n);
    if s.chars().nth(n).is_some() {
        prefix.push_str("...");
    }
    prefix
}

/// Single-line preview for log fields: newlines collapsed to spaces.
pub fn log_preview(s: &str, n: usize) -> String {
    preview(s, n).replace(['\n', '\r'], " ")
}
