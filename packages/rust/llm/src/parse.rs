//! Tolerant extraction of structured data from generated text.
//!
//! Sectioned responses look like:
//!
//! ```text
//! SCORE: 3
//! GAPS:
//! - No MFA for contractors
//! - Legacy LDAP still in use
//! STRENGTHS:
//! 1. Central IdP
//! ```
//!
//! Missing sections yield empty lists; only strict-JSON decoding reports a
//! failure, as a [`ParseFailure`] value carrying the raw text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// An all-caps label followed by a colon, optionally behind Markdown
/// heading/bold markers: `NEXT:`, `## TOTAL CONTROLS:`, `**GAPS:**`.
static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[#*\s]*[A-Z][A-Z0-9 &/()_-]*:").expect("header regex"));

/// `- item`, `* item`, `• item`, `1. item`, `2) item`.
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-•]\s*|\*\s+|\d+[.)]\s*)(\S.*)$").expect("bullet regex")
});

/// `SCORE: 3` / `SCORE: 2.5` / `**SCORE:** 4`.
static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SCORE:\**\s*(-?\d+(?:\.\d+)?)").expect("score regex"));

/// Digits directly after a label, allowing closing bold markers.
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\**\s*(\d+)").expect("count regex"));

// ---------------------------------------------------------------------------
// Sectioned text
// ---------------------------------------------------------------------------

/// Collect the bulleted or numbered items listed under `header`.
///
/// Collection stops at the next header-like line, or at a blank line once
/// items have been found and no further bullet follows. Returns an empty
/// list when the header is absent.
pub fn extract_section(text: &str, header: &str) -> Vec<String> {
    let Some(body) = after_header(text, header) else {
        return Vec::new();
    };

    let lines: Vec<&str> = body.lines().collect();
    let mut items = Vec::new();

    for (i, raw) in lines.iter().enumerate() {
        let line = if i == 0 {
            raw.trim().trim_start_matches('*').trim()
        } else {
            raw.trim()
        };

        if line.is_empty() {
            if i > 0 && !items.is_empty() && !next_is_bullet(&lines[i + 1..]) {
                break;
            }
            continue;
        }

        if let Some(item) = bullet_item(line) {
            items.push(item);
        } else if i > 0 && HEADER_RE.is_match(line) {
            break;
        }
    }

    items
}

/// The prose under `header`, joined into one line, up to the next header.
pub fn extract_paragraph(text: &str, header: &str) -> String {
    let Some(body) = after_header(text, header) else {
        return String::new();
    };

    let mut parts = Vec::new();
    for (i, raw) in body.lines().enumerate() {
        let line = raw.trim().trim_start_matches('*').trim();
        if i > 0 && HEADER_RE.is_match(raw.trim()) {
            break;
        }
        if !line.is_empty() {
            parts.push(line);
        }
    }
    parts.join(" ")
}

/// Read `SCORE: <n>` and clamp it into `[min, max]`. Absent means 0, clamped.
pub fn extract_score(text: &str, min: f64, max: f64) -> f64 {
    let raw = SCORE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    raw.clamp(min, max)
}

/// Read a non-negative integer following `label`, e.g. `TOTAL CONTROLS: 12`.
pub fn extract_count(text: &str, label: &str) -> Option<u32> {
    text.match_indices(label).find_map(|(pos, _)| {
        COUNT_RE
            .captures(&text[pos + label.len()..])?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    })
}

/// Locate `header`, preferring an occurrence at the start of a line, and
/// return everything after it.
fn after_header<'a>(text: &'a str, header: &str) -> Option<&'a str> {
    let mut first = None;
    for (pos, _) in text.match_indices(header) {
        first.get_or_insert(pos);
        let line_start = text[..pos].rfind('\n').map_or(0, |n| n + 1);
        if text[line_start..pos]
            .chars()
            .all(|c| c == '#' || c == '*' || c.is_whitespace())
        {
            return Some(&text[pos + header.len()..]);
        }
    }
    first.map(|pos| &text[pos + header.len()..])
}

fn bullet_item(line: &str) -> Option<String> {
    let caps = BULLET_RE.captures(line)?;
    let item = caps.get(1)?.as_str().trim();
    (!item.is_empty()).then(|| item.to_string())
}

fn next_is_bullet(rest: &[&str]) -> bool {
    rest.iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .is_some_and(|l| BULLET_RE.is_match(l))
}

// ---------------------------------------------------------------------------
// Strict JSON
// ---------------------------------------------------------------------------

/// A strict-JSON response that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub error: String,
    pub raw_text: String,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not decode JSON response: {}", self.error)
    }
}

/// Drop one Markdown code-fence layer (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let inner = if let Some(start) = text.find("```json") {
        until_fence(&text[start + "```json".len()..])
    } else if let Some(start) = text.find("```") {
        until_fence(&text[start + 3..])
    } else {
        text
    };
    inner.trim()
}

fn until_fence(rest: &str) -> &str {
    match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Decode a JSON response, tolerating a code fence around it.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseFailure> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| ParseFailure {
        error: e.to_string(),
        raw_text: text.to_string(),
    })
}

/// Outcome of a strict-JSON stage, kept in state either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Structured<T> {
    Parsed(T),
    Failed(ParseFailure),
}

impl<T: DeserializeOwned> Structured<T> {
    pub fn from_response(text: &str) -> Self {
        match parse_json(text) {
            Ok(value) => Self::Parsed(value),
            Err(failure) => Self::Failed(failure),
        }
    }
}

impl<T> Structured<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ParseFailure> {
        match self {
            Self::Parsed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}
