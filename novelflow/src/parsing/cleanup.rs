//! Text cleanup passes applied before re-parsing.
//!
//! Every scanner here is string-aware: content inside quoted strings is never
//! treated as a comment, comma or key.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").expect("valid control-character pattern"));

/// Comment, control-character and trailing-comma cleanup.
#[must_use]
pub fn clean(text: &str) -> String {
    let without_comments = strip_comments(text);
    let without_controls = CONTROL_CHARS.replace_all(&without_comments, "");
    remove_trailing_commas(&without_controls)
}

/// Key quoting, quote normalization and string escaping, then trailing-comma
/// removal.
#[must_use]
pub fn lenient(text: &str) -> String {
    remove_trailing_commas(&normalize_quotes_and_keys(text))
}

/// Removes `//` line comments and `/* */` block comments outside strings.
#[must_use]
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"' | '\'', _) => {
                quote = Some(c);
                out.push(c);
            }
            ('/', Some('/')) => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Drops commas that directly precede a closing brace or bracket.
#[must_use]
pub fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            ',' if text[i + 1..].trim_start().starts_with(['}', ']']) => {}
            _ => out.push(c),
        }
    }
    out
}

fn is_key_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '$')
}

fn closing_quote(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\'' => Some('\''),
        '\u{201C}' => Some('\u{201D}'),
        '\u{2018}' => Some('\u{2019}'),
        _ => None,
    }
}

/// Copies one string literal starting at `start` as a double-quoted JSON
/// string. Returns the index just past its closing delimiter (or the end of
/// input when unterminated).
fn copy_string(chars: &[char], start: usize, close: char, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                if next == close && close != '"' {
                    out.push(next);
                } else {
                    out.push('\\');
                    out.push(next);
                }
                i += 2;
                continue;
            }
            c if c == close => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
        i += 1;
    }
    i
}

/// Quotes bare object keys, rewrites single and curly quoted strings as
/// double-quoted ones, and escapes raw newlines and tabs inside strings.
#[must_use]
pub fn normalize_quotes_and_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(close) = closing_quote(c) {
            i = copy_string(&chars, i, close, &mut out);
            prev = Some('"');
            continue;
        }

        if is_key_start(c) && matches!(prev, Some('{' | ',')) {
            let start = i;
            while i < chars.len() && is_key_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
            if next == Some(&':') {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            } else {
                out.push_str(&word);
            }
            prev = Some('"');
            continue;
        }

        out.push(c);
        if !c.is_whitespace() {
            prev = Some(c);
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_strip_comments_respects_strings() {
        let text = "{\"a\": 1, // note\n \"b\": \"http://x\" /* gone */}";
        assert_eq!(parse(&strip_comments(text)), json!({"a": 1, "b": "http://x"}));
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert_eq!(strip_comments("[1] /* never closed"), "[1] ");
    }

    #[test]
    fn test_remove_trailing_commas() {
        assert_eq!(remove_trailing_commas("{\"a\": [1, 2,], }"), "{\"a\": [1, 2] }");
        assert_eq!(remove_trailing_commas("{\"a\": \",}\"}"), "{\"a\": \",}\"}");
    }

    #[test]
    fn test_clean_strips_control_chars() {
        let text = "{\"a\":\u{0001} 1,\u{000B}}";
        assert_eq!(parse(&clean(text)), json!({"a": 1}));
    }

    #[test]
    fn test_lenient_bare_keys_and_single_quotes() {
        let text = "{title: 'A', tags: ['x', 'y'],}";
        assert_eq!(parse(&lenient(text)), json!({"title": "A", "tags": ["x", "y"]}));
    }

    #[test]
    fn test_lenient_curly_quotes() {
        let text = "{\u{201C}title\u{201D}: \u{201C}雨夜\u{201D}}";
        assert_eq!(parse(&lenient(text)), json!({"title": "雨夜"}));
    }

    #[test]
    fn test_lenient_escapes_raw_newlines() {
        let text = "{\"body\": \"line1\nline2\ttab\"}";
        assert_eq!(parse(&lenient(text)), json!({"body": "line1\nline2\ttab"}));
    }

    #[test]
    fn test_lenient_inner_double_quotes() {
        let text = r#"{'q': 'say "hi"', 'it': 'it\'s'}"#;
        assert_eq!(parse(&lenient(text)), json!({"q": "say \"hi\"", "it": "it's"}));
    }

    #[test]
    fn test_lenient_leaves_literals() {
        let text = "{ok: true, items: [null, false, 3]}";
        assert_eq!(parse(&lenient(text)), json!({"ok": true, "items": [null, false, 3]}));
    }

    #[test]
    fn test_lenient_keeps_quotes_inside_double_strings() {
        let text = "{\"line\": \"她说\u{201C}好\u{201D}\"}";
        assert_eq!(parse(&lenient(text)), json!({"line": "她说\u{201C}好\u{201D}"}));
    }
}
