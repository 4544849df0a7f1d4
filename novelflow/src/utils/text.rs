//! Text helpers.

/// Returns at most `limit` characters of `text`, with `...` appended when
/// anything was cut.
///
/// Slices on character boundaries, so multi-byte text never panics.
#[must_use]
pub fn bounded_preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(bounded_preview("hello", 10), "hello");
        assert_eq!(bounded_preview("hello", 5), "hello");
    }

    #[test]
    fn test_long_text_cut() {
        assert_eq!(bounded_preview("hello world", 5), "hello...");
    }

    #[test]
    fn test_multibyte_boundary() {
        assert_eq!(bounded_preview("雨夜的告白", 2), "雨夜...");
    }
}
