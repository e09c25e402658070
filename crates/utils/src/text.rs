/// Returns at most `max_chars` characters of `input`, never splitting a code point.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// First `max_chars` characters, for log previews.
pub fn preview(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
