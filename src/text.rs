//! Character-boundary text helpers.

/// Keep at most `max_chars` characters of `text`.
///
/// Cuts on a `char` boundary, so applying it twice gives the same result as once.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Single-line preview for log output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    let ellipsis = if cut.len() < text.len() { "..." } else { "" };
    format!("{}{ellipsis}", cut.replace('\n', " "))
}
