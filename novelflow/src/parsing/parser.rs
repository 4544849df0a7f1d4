//! Multi-pass structured response parser.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use super::cleanup;
use super::repair::BracketBalanceRepairer;
use crate::errors::ParseError;
use crate::utils::bounded_preview;

/// Default number of characters kept in failure previews.
pub const DEFAULT_PREVIEW_LIMIT: usize = 500;

#[allow(clippy::expect_used)]
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("valid fence pattern"));

#[allow(clippy::expect_used)]
static OPEN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*)$").expect("valid open fence pattern"));

/// The pass that produced a parseable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairPass {
    /// The extracted candidate parsed as-is.
    Direct,
    /// Parsed after bracket-balance repair.
    BracketBalance,
    /// Parsed after comment, control-character and trailing-comma cleanup.
    Cleanup,
    /// Parsed after key quoting and quote normalization.
    Lenient,
}

impl fmt::Display for RepairPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::BracketBalance => write!(f, "bracket_balance"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

/// A successfully parsed value and the pass that recovered it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// The parsed value.
    pub value: Value,
    /// Diagnostic only; callers must not branch on it.
    pub pass: RepairPass,
}

/// Recovers structured data from free-form model output.
///
/// Passes run in a fixed order, each only when the previous one failed:
/// extraction, direct parse, bracket repair (truncated input only), cleanup,
/// lenient normalization. Never panics.
#[derive(Debug, Clone)]
pub struct StructuredResponseParser {
    preview_limit: usize,
    repairer: BracketBalanceRepairer,
}

impl Default for StructuredResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredResponseParser {
    /// Creates a parser with the default preview limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            repairer: BracketBalanceRepairer::new(),
        }
    }

    /// Sets the number of characters kept in failure previews.
    #[must_use]
    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    /// Returns the preview limit.
    #[must_use]
    pub fn preview_limit(&self) -> usize {
        self.preview_limit
    }

    /// Parses `raw`, running repair passes as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when no pass produced a parseable value. The
    /// error carries a bounded preview of the last cleaned candidate.
    pub fn parse(&self, raw: &str) -> Result<ParseOutcome, ParseError> {
        let candidates = extract_candidates(raw);
        let mut first_failure = None;
        for candidate in candidates {
            match self.run_passes(candidate) {
                Ok(outcome) => return Ok(outcome),
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        let Some((error, working)) = first_failure else {
            return Err(ParseError::new(
                "no structured data found in response",
                bounded_preview(raw.trim(), self.preview_limit),
            ));
        };
        tracing::debug!(
            response_length = raw.len(),
            error = %error,
            "All repair passes failed"
        );
        Err(ParseError::new(
            error.to_string(),
            bounded_preview(&working, self.preview_limit),
        ))
    }

    /// Runs the repair passes over one candidate. On failure returns the last
    /// parser error and the last cleaned text.
    fn run_passes(&self, candidate: &str) -> Result<ParseOutcome, (serde_json::Error, String)> {
        let mut last_error = match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return Ok(self.outcome(value, RepairPass::Direct)),
            Err(e) => e,
        };

        let mut working = candidate.to_string();
        if !ends_with_closer(candidate) {
            working = self.repairer.repair(candidate);
            match serde_json::from_str::<Value>(&working) {
                Ok(value) => return Ok(self.outcome(value, RepairPass::BracketBalance)),
                Err(e) => last_error = e,
            }
        }

        working = cleanup::clean(&working);
        match serde_json::from_str::<Value>(&working) {
            Ok(value) => return Ok(self.outcome(value, RepairPass::Cleanup)),
            Err(e) => last_error = e,
        }

        working = cleanup::lenient(&working);
        match serde_json::from_str::<Value>(&working) {
            Ok(value) => return Ok(self.outcome(value, RepairPass::Lenient)),
            Err(e) => last_error = e,
        }
        Err((last_error, working))
    }

    /// Parses `raw` and returns only the value.
    ///
    /// # Errors
    ///
    /// See [`StructuredResponseParser::parse`].
    pub fn parse_value(&self, raw: &str) -> Result<Value, ParseError> {
        self.parse(raw).map(|o| o.value)
    }

    fn outcome(&self, value: Value, pass: RepairPass) -> ParseOutcome {
        if pass != RepairPass::Direct {
            tracing::debug!(pass = %pass, "Recovered structured response");
        }
        ParseOutcome { value, pass }
    }
}

fn ends_with_closer(text: &str) -> bool {
    text.trim_end().ends_with(['}', ']'])
}

/// Locates the structured candidates inside `raw`, most likely first.
///
/// A fenced block that contains an opening delimiter wins; an unterminated
/// fence runs to the end of the text. Inside the chosen region the first
/// candidate spans from the first opener to the last closer of the same
/// kind, or to the end of the region when none follows. When a `[` comes
/// before the first `{` (prose such as "chapters [1-2]" or a top-level
/// array), the first-`{`-to-last-`}` span is tried next. The last resort is
/// the value that closes at the first opener, or everything after it when
/// it never closes.
fn extract_candidates(raw: &str) -> Vec<&str> {
    let fenced = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|body| body.contains(['{', '[']));

    let region = fenced
        .or_else(|| {
            if FENCED_BLOCK.is_match(raw) {
                return None;
            }
            OPEN_FENCE
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|body| body.contains(['{', '[']))
        })
        .unwrap_or(raw);

    let Some(start) = region.find(['{', '[']) else {
        return Vec::new();
    };
    let mut candidates = vec![outer_span(region, start)];
    if region[start..].starts_with('[') {
        if let Some(brace) = region.find('{') {
            candidates.push(outer_span(region, brace));
        }
    }
    let tail = &region[start..];
    let balanced = balanced_end(tail).map_or(tail, |end| &tail[..end]);
    candidates.push(balanced.trim_end());
    candidates.dedup();
    candidates
}

/// Span from the opener at `start` to the last matching closer after it.
fn outer_span(region: &str, start: usize) -> &str {
    let tail = &region[start..];
    let closer = if tail.starts_with('{') { '}' } else { ']' };
    let end = tail.rfind(closer).map_or(tail.len(), |i| i + closer.len_utf8());
    tail[..end].trim_end()
}

/// Byte offset just past the delimiter that closes the value at the start of
/// `text`, if it closes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parser() -> StructuredResponseParser {
        StructuredResponseParser::new()
    }

    #[test]
    fn test_valid_input_is_direct_and_identical() {
        let doc = json!({"title": "A", "chapters": [{"title": "c1", "summary": "s"}], "n": 3});
        let text = serde_json::to_string_pretty(&doc).unwrap();

        let outcome = parser().parse(&text).unwrap();

        assert_eq!(outcome.pass, RepairPass::Direct);
        assert_eq!(outcome.value, doc);
    }

    #[test]
    fn test_truncated_fenced_response_is_repaired() {
        let raw = "Here is the JSON: ```json\n{\"title\": \"A\", \"chapters\": [{\"title\":\"c1\"";

        let outcome = parser().parse(raw).unwrap();

        assert_eq!(outcome.value, json!({"title": "A", "chapters": [{"title": "c1"}]}));
    }

    #[test]
    fn test_escaped_quote_survives_truncation() {
        let raw = r#"{"quote": "a\"b", "next": "c"#;

        let value = parser().parse_value(raw).unwrap();

        assert_eq!(value, json!({"quote": "a\"b"}));
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Sure! Here you go:\n{\"title\": \"Tide\"}\nLet me know if you need more.";
        let outcome = parser().parse(raw).unwrap();
        assert_eq!(outcome.pass, RepairPass::Direct);
        assert_eq!(outcome.value, json!({"title": "Tide"}));
    }

    #[test]
    fn test_closed_fence_preferred() {
        let raw = "Example {not json}\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(parser().parse_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_bracketed_prose_before_object() {
        let raw = "Outline for chapters [1-2]:\n{\"chapters\": [{\"title\": \"a\", \"summary\": \"s\"}]}";
        let outcome = parser().parse(raw).unwrap();
        assert_eq!(outcome.pass, RepairPass::Direct);
        assert_eq!(outcome.value, json!({"chapters": [{"title": "a", "summary": "s"}]}));
    }

    #[test]
    fn test_truncated_top_level_array_stays_an_array() {
        let raw = "[{\"index\": 1, \"title\": \"c1\"}, {\"index\": 2, \"ti";
        let value = parser().parse_value(raw).unwrap();
        assert_eq!(value, json!([{"index": 1, "title": "c1"}]));
    }

    #[test]
    fn test_truncation_after_nested_object() {
        let outcome = parser().parse(r#"{"a": {"b": 1}, "c": "d"#).unwrap();
        assert_eq!(outcome.pass, RepairPass::BracketBalance);
        assert_eq!(outcome.value, json!({"a": {"b": 1}, "c": "d"}));
    }

    #[test]
    fn test_top_level_array() {
        let raw = "```\n[{\"index\": 1}, {\"index\": 2}]\n```";
        assert_eq!(parser().parse_value(raw).unwrap(), json!([{"index": 1}, {"index": 2}]));
    }

    #[test]
    fn test_cleanup_pass() {
        let raw = "{\n  \"title\": \"A\", // the title\n  \"tags\": [\"x\",],\n}";
        let outcome = parser().parse(raw).unwrap();
        assert_eq!(outcome.pass, RepairPass::Cleanup);
        assert_eq!(outcome.value, json!({"title": "A", "tags": ["x"]}));
    }

    #[test]
    fn test_lenient_pass() {
        let raw = "{title: 'A', summary: 'line one\nline two'}";
        let outcome = parser().parse(raw).unwrap();
        assert_eq!(outcome.pass, RepairPass::Lenient);
        assert_eq!(outcome.value, json!({"title": "A", "summary": "line one\nline two"}));
    }

    #[test]
    fn test_no_structure_is_error() {
        let err = parser().parse("I'm sorry, I can't help with that.").unwrap_err();
        assert!(err.reason.contains("no structured data"));
        assert!(err.preview.starts_with("I'm sorry"));
    }

    #[test]
    fn test_error_preview_is_bounded() {
        let raw = format!("{{\"a\": {}", "@".repeat(2000));
        let err = StructuredResponseParser::new().with_preview_limit(50).parse(&raw).unwrap_err();
        assert!(err.preview.chars().count() <= 53);
    }

    #[test]
    fn test_every_truncation_is_safe() {
        let doc = json!({
            "title": "雨夜 \"quoted\"",
            "summary": "Line one\nLine two",
            "characters": [{"name": "Lin", "role": "lead"}, {"name": "Zhou", "role": "rival"}],
            "chapters": [{"index": 1, "title": "c1", "target_length": 1200}, {"index": 2, "title": "c2"}]
        });
        let text = serde_json::to_string(&doc).unwrap();
        let p = parser();

        for (offset, _) in text.char_indices() {
            let _ = p.parse(&text[..offset]);
        }
        assert_eq!(p.parse_value(&text).unwrap(), doc);
    }

    #[test]
    fn test_truncated_mid_document_recovers_prefix() {
        let raw = r#"{"title": "A", "summary": "B", "characters": [{"name": "Lin", "role": "le"#;
        let value = parser().parse_value(raw).unwrap();
        assert_eq!(value["title"], "A");
        assert_eq!(value["characters"][0]["name"], "Lin");
    }
}
