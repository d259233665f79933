//! Lenient structural parser for generated JSON.
//!
//! Model output is often almost-JSON: wrapped in markdown fences, preceded by
//! chatter, sprinkled with smart quotes, LaTeX escapes, raw control
//! characters, or trailing commas. Each repair pass is a function
//! `&str -> String` applied in sequence before a strict parse.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use coursesmith_shared::{CoursesmithError, Result};

/// Repair raw model output and parse it into a JSON value.
pub fn parse_lenient(raw: &str) -> Result<Value> {
    let fenced = strip_code_fences(raw);
    let sliced = extract_object(&fenced).ok_or_else(|| {
        CoursesmithError::malformed(format!(
            "no JSON object found in output: {}",
            preview(raw)
        ))
    })?;

    let mut text = sliced.to_string();
    text = normalize_quotes(&text);
    text = unescape_latex_parens(&text);
    text = escape_stray_backslashes(&text);
    text = strip_control_chars(&text);
    text = remove_trailing_commas(&text);

    serde_json::from_str(&text)
        .map_err(|e| CoursesmithError::malformed(format!("{e} in: {}", preview(&text))))
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pass 1: Strip markdown code fences
// ---------------------------------------------------------------------------

/// Remove ```` ``` ```` and ```` ```json ```` markers wherever they appear.
fn strip_code_fences(text: &str) -> String {
    static FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid regex"));

    FENCE_RE.replace_all(text, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Slice the outermost object
// ---------------------------------------------------------------------------

/// Substring from the first `{` to the last `}`, inclusive.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ---------------------------------------------------------------------------
// Pass 3: Smart quotes
// ---------------------------------------------------------------------------

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 4: LaTeX inline-math delimiters
// ---------------------------------------------------------------------------

/// `\(` and `\)` are not JSON escapes; keep the parenthesis, drop the slash.
fn unescape_latex_parens(text: &str) -> String {
    text.replace("\\(", "(").replace("\\)", ")")
}

// ---------------------------------------------------------------------------
// Pass 5: Stray backslashes
// ---------------------------------------------------------------------------

/// Double every backslash that does not start a valid JSON escape.
///
/// Valid escape pairs are copied through as a unit, so `\\` never has its
/// second slash re-examined.
fn escape_stray_backslashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Pass 6: Control characters
// ---------------------------------------------------------------------------

/// Raw control characters are illegal inside JSON strings. Line breaks and
/// tabs become spaces so words stay apart; the rest are dropped.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() && (c as u32) < 0x80 => None,
            c => Some(c),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 7: Trailing commas
// ---------------------------------------------------------------------------

fn remove_trailing_commas(text: &str) -> String {
    static TRAILING_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

    TRAILING_COMMA_RE.replace_all(text, "$1").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fences_removes_markers() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(input), "\n{\"a\": 1}\n");
    }

    #[test]
    fn extract_object_slices_outermost_braces() {
        let input = "Sure! Here is your outline: {\"modules\": [{\"title\": \"x\"}]} Hope it helps.";
        assert_eq!(
            extract_object(input),
            Some("{\"modules\": [{\"title\": \"x\"}]}")
        );
        assert_eq!(extract_object("no braces at all"), None);
        assert_eq!(extract_object("} backwards {"), None);
    }

    #[test]
    fn normalize_quotes_replaces_smart_quotes() {
        assert_eq!(
            normalize_quotes("{\u{201C}suggestion\u{201D}: \u{201C}Graph\u{2019}s\u{201D}}"),
            "{\"suggestion\": \"Graph's\"}"
        );
    }

    #[test]
    fn unescape_latex_parens_keeps_parens() {
        assert_eq!(unescape_latex_parens(r"area \(\pi r^2\)"), r"area (\pi r^2)");
    }

    #[test]
    fn escape_stray_backslashes_doubles_invalid_escapes() {
        assert_eq!(escape_stray_backslashes(r"\pi"), r"\\pi");
        assert_eq!(escape_stray_backslashes(r"C:\x"), r"C:\\x");
        assert_eq!(escape_stray_backslashes("trailing\\"), "trailing\\\\");
    }

    #[test]
    fn escape_stray_backslashes_keeps_valid_escapes() {
        let input = r#"line\nbreak \"quoted\" \\ \/ \u00e9 \t"#;
        assert_eq!(escape_stray_backslashes(input), input);
    }

    #[test]
    fn strip_control_chars_drops_raw_controls() {
        assert_eq!(strip_control_chars("a\u{0}b\u{7f}c"), "abc");
        assert_eq!(strip_control_chars("one\ntwo\tthree"), "one two three");
    }

    #[test]
    fn remove_trailing_commas_before_closers() {
        assert_eq!(
            remove_trailing_commas("{\"a\": [1, 2, ], \"b\": 3,\n}"),
            "{\"a\": [1, 2], \"b\": 3}"
        );
    }

    #[test]
    fn parse_lenient_accepts_clean_json() {
        let value = parse_lenient("{\"suggestion\": \"Foundations of Graph Theory\"}").unwrap();
        assert_eq!(value["suggestion"], "Foundations of Graph Theory");
    }

    #[test]
    fn parse_lenient_repairs_messy_output() {
        let raw = "Here you go:\n```json\n{\n  \u{201C}text\u{201D}: [\"The area is \\(\\pi r^2\\).\", \"Second\nparagraph\",],\n}\n```";
        let value = parse_lenient(raw).unwrap();
        assert_eq!(value["text"][0], "The area is (\\pi r^2).");
        assert_eq!(value["text"][1], "Second paragraph");
    }

    #[test]
    fn parse_lenient_rejects_output_without_object() {
        let err = parse_lenient("I cannot help with that.").unwrap_err();
        assert!(matches!(err, CoursesmithError::MalformedOutput { .. }));
    }

    #[test]
    fn parse_lenient_rejects_unrepairable_json() {
        let err = parse_lenient("{\"modules\": [{\"title\": }").unwrap_err();
        assert!(matches!(err, CoursesmithError::MalformedOutput { .. }));
    }

    #[test]
    fn fixture_topic_output_parses() {
        let raw = std::fs::read_to_string("../../../fixtures/generation/topic-messy.txt")
            .expect("read topic fixture");
        let value = parse_lenient(&raw).expect("repair fixture");
        assert_eq!(value["text"].as_array().map(Vec::len), Some(3));
        assert_eq!(value["mcqs"][0]["answer"], "O(V + E)");
        assert!(value["extraQuestions"].is_array());
    }

    #[test]
    fn fixture_outline_output_parses() {
        let raw = std::fs::read_to_string("../../../fixtures/generation/outline-fenced.txt")
            .expect("read outline fixture");
        let value = parse_lenient(&raw).expect("repair fixture");
        assert_eq!(value["modules"].as_array().map(Vec::len), Some(6));
    }
}
