//! Model response parsing with graceful degradation.
//!
//! [`parse_response`] never fails. It first tries strict extraction: strip
//! markdown fences, locate the outermost JSON object, repair common LLM JSON
//! slips (trailing commas, smart quotes), and decode it into the exact
//! response schema. When that fails, every field is recovered independently:
//!
//! 1. Lenient JSON access, tolerating wrong shapes (an object where a string
//!    was asked for, a comma-separated string instead of a list, `"7/10"`).
//! 2. Text heuristics over the raw response: `Summary:` / `Tech stack:`
//!    lines, a `complexity ... N` mention, bulleted or numbered lists under
//!    `Objectives`, `Recommendations` and `Key Components` headings.
//!
//! The outcome is tagged: [`ParsedResponse::Parsed`] when every field was
//! recovered, [`ParsedResponse::Partial`] when some were, and
//! [`ParsedResponse::Degraded`] when none were. `raw_response` is always set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::models::{AnalysisResult, KeyComponent};

/// A structured field of [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Summary,
    Objectives,
    Architecture,
    KeyComponents,
    TechStack,
    ComplexityScore,
    Recommendations,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Summary,
        Field::Objectives,
        Field::Architecture,
        Field::KeyComponents,
        Field::TechStack,
        Field::ComplexityScore,
        Field::Recommendations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Summary => "summary",
            Field::Objectives => "objectives",
            Field::Architecture => "architecture",
            Field::KeyComponents => "key_components",
            Field::TechStack => "tech_stack",
            Field::ComplexityScore => "complexity_score",
            Field::Recommendations => "recommendations",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal notice that the response did not match the expected schema.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct PartialParseWarning {
    pub message: String,
    pub missing: Vec<Field>,
}

/// Tagged parse outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Parsed(AnalysisResult),
    Partial {
        result: AnalysisResult,
        missing: Vec<Field>,
    },
    Degraded {
        result: AnalysisResult,
        warning: PartialParseWarning,
    },
}

impl ParsedResponse {
    pub fn result(&self) -> &AnalysisResult {
        match self {
            ParsedResponse::Parsed(result)
            | ParsedResponse::Partial { result, .. }
            | ParsedResponse::Degraded { result, .. } => result,
        }
    }

    pub fn warning(&self) -> Option<PartialParseWarning> {
        match self {
            ParsedResponse::Parsed(_) => None,
            ParsedResponse::Partial { missing, .. } => Some(PartialParseWarning {
                message: format!(
                    "response only partially matched the schema; missing: {}",
                    missing
                        .iter()
                        .map(Field::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                missing: missing.clone(),
            }),
            ParsedResponse::Degraded { warning, .. } => Some(warning.clone()),
        }
    }

    pub fn into_parts(self) -> (AnalysisResult, Option<PartialParseWarning>) {
        let warning = self.warning();
        let result = match self {
            ParsedResponse::Parsed(result)
            | ParsedResponse::Partial { result, .. }
            | ParsedResponse::Degraded { result, .. } => result,
        };
        (result, warning)
    }
}

#[derive(Deserialize)]
struct StrictResponse {
    summary: String,
    objectives: Vec<String>,
    architecture: String,
    key_components: Vec<StrictComponent>,
    tech_stack: Vec<String>,
    complexity_score: u8,
    recommendations: Vec<String>,
}

#[derive(Deserialize)]
struct StrictComponent {
    name: String,
    purpose: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

/// Parse a raw model response. Never fails; see the module docs.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let json = extract_object(raw);

    if let Some(obj) = &json {
        if let Some(result) = parse_strict(obj, raw) {
            return ParsedResponse::Parsed(result);
        }
    }

    let obj = json.as_ref();
    let mut result = AnalysisResult::raw_only(raw);
    let mut missing = Vec::new();

    match obj
        .and_then(|o| o.get("summary"))
        .and_then(lenient_text)
        .or_else(|| text_summary(raw))
    {
        Some(v) => result.summary = v,
        None => missing.push(Field::Summary),
    }

    match obj
        .and_then(|o| o.get("objectives"))
        .and_then(lenient_list)
        .or_else(|| text_list(raw, &["objectives", "goals", "main objectives"]))
    {
        Some(v) => result.objectives = v,
        None => missing.push(Field::Objectives),
    }

    match obj
        .and_then(|o| o.get("architecture"))
        .and_then(lenient_text)
        .or_else(|| text_labeled(raw, &["architecture"]))
    {
        Some(v) => result.architecture = v,
        None => missing.push(Field::Architecture),
    }

    match obj
        .and_then(|o| o.get("key_components"))
        .and_then(lenient_components)
        .or_else(|| text_components(raw))
    {
        Some(v) => result.key_components = v,
        None => missing.push(Field::KeyComponents),
    }

    match obj
        .and_then(|o| o.get("tech_stack"))
        .and_then(lenient_list)
        .or_else(|| text_tech_stack(raw))
    {
        Some(v) => result.tech_stack = dedup_case_insensitive(v),
        None => missing.push(Field::TechStack),
    }

    match obj
        .and_then(|o| o.get("complexity_score"))
        .and_then(lenient_score)
        .or_else(|| text_complexity(raw))
    {
        Some(v) => result.complexity_score = Some(v),
        None => missing.push(Field::ComplexityScore),
    }

    match obj
        .and_then(|o| o.get("recommendations"))
        .and_then(lenient_list)
        .or_else(|| text_list(raw, &["recommendations", "suggestions", "improvements"]))
    {
        Some(v) => result.recommendations = v,
        None => missing.push(Field::Recommendations),
    }

    if missing.is_empty() {
        ParsedResponse::Parsed(result)
    } else if missing.len() == Field::ALL.len() {
        ParsedResponse::Degraded {
            result: AnalysisResult::raw_only(raw),
            warning: PartialParseWarning {
                message: if json.is_some() {
                    "response JSON contained none of the expected fields".to_string()
                } else {
                    "response was not JSON and had no recognizable sections".to_string()
                },
                missing,
            },
        }
    } else {
        ParsedResponse::Partial { result, missing }
    }
}

fn parse_strict(obj: &Map<String, Value>, raw: &str) -> Option<AnalysisResult> {
    let strict: StrictResponse = serde_json::from_value(Value::Object(obj.clone())).ok()?;
    if strict.summary.trim().is_empty() || !(1..=10).contains(&strict.complexity_score) {
        return None;
    }

    Some(AnalysisResult {
        summary: strict.summary.trim().to_string(),
        objectives: strict.objectives,
        architecture: strict.architecture.trim().to_string(),
        key_components: strict
            .key_components
            .into_iter()
            .map(|c| KeyComponent {
                name: c.name,
                purpose: c.purpose,
                kind: c.kind,
                location: c.location,
            })
            .collect(),
        tech_stack: dedup_case_insensitive(strict.tech_stack),
        complexity_score: Some(strict.complexity_score),
        recommendations: strict.recommendations,
        raw_response: raw.to_string(),
    })
}

// ============ JSON location ============

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn fix_json_issues(json: &str) -> String {
    let fixed = json
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    TRAILING_COMMA.replace_all(&fixed, "$1").into_owned()
}

/// The outermost JSON object in `raw`, if one decodes.
fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let clean = strip_markdown_fences(raw);
    let fragment = extract_json_fragment(clean, '{', '}')?;

    let value = serde_json::from_str::<Value>(fragment)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&fix_json_issues(fragment)).ok())?;
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

// ============ Lenient JSON ============

fn lenient_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => render_object(map),
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Flatten an object such as `{"pattern": "MVC", "layers": [...]}` into prose.
fn render_object(map: &Map<String, Value>) -> String {
    let mut parts = Vec::new();
    if let Some(pattern) = map.get("pattern").and_then(scalar_text) {
        parts.push(pattern);
    }
    for (key, value) in map {
        if key == "pattern" {
            continue;
        }
        let rendered = match value {
            Value::Array(items) => items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(inner) => inner
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|v| format!("{} ({})", k, v)))
                .collect::<Vec<_>>()
                .join(", "),
            other => scalar_text(other).unwrap_or_default(),
        };
        if !rendered.is_empty() {
            parts.push(format!("{}: {}", key.replace('_', " "), rendered));
        }
    }
    parts.join(". ")
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("name").and_then(scalar_text),
        _ => None,
    }
}

fn lenient_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(scalar_text).collect()),
        Value::String(s) => {
            let items = split_items(s);
            (!items.is_empty()).then_some(items)
        }
        // e.g. tech_stack grouped by category
        Value::Object(map) => {
            let items: Vec<String> = map
                .values()
                .flat_map(|v| match v {
                    Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
                    other => scalar_text(other).into_iter().collect::<Vec<_>>(),
                })
                .collect();
            (!items.is_empty()).then_some(items)
        }
        _ => None,
    }
}

fn lenient_components(value: &Value) -> Option<Vec<KeyComponent>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => {
                        let name = map.get("name").and_then(scalar_text)?;
                        let purpose = ["purpose", "description", "responsibility"]
                            .iter()
                            .find_map(|k| map.get(*k).and_then(scalar_text))
                            .unwrap_or_default();
                        Some(KeyComponent {
                            name,
                            purpose,
                            kind: ["type", "kind"]
                                .iter()
                                .find_map(|k| map.get(*k).and_then(scalar_text)),
                            location: ["location", "path", "file"]
                                .iter()
                                .find_map(|k| map.get(*k).and_then(scalar_text)),
                        })
                    }
                    Value::String(s) => Some(component_from_line(s)),
                    _ => None,
                })
                .collect(),
        ),
        Value::Object(map) => Some(
            map.iter()
                .map(|(name, v)| KeyComponent {
                    name: name.clone(),
                    purpose: scalar_text(v).unwrap_or_default(),
                    kind: None,
                    location: None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn lenient_score(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => LEADING_NUMBER
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())?,
        _ => return None,
    };
    let rounded = n.round();
    (1.0..=10.0).contains(&rounded).then_some(rounded as u8)
}

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)").unwrap());

// ============ Text heuristics ============

static COMPLEXITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)complexity[^0-9\n]{0,40}?(\d{1,2})(?:\s*/\s*10)?\b").unwrap());

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•+]|\d{1,2}[.)])\s+(.+?)\s*$").unwrap());

/// Normalized heading text, or `None` if the line doesn't look like a heading.
///
/// Accepts `## Heading`, `**Heading**`, `Heading:` on a line of its own.
fn heading_text(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || BULLET.is_match(trimmed) {
        return None;
    }
    let is_markdown = trimmed.starts_with('#');
    let is_bold = trimmed.starts_with("**") && trimmed.trim_end_matches(':').ends_with("**");
    let is_label = trimmed.ends_with(':') && trimmed.len() <= 40;
    if !(is_markdown || is_bold || is_label) {
        return None;
    }
    let text = trimmed
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim_end_matches(':')
        .trim_matches('*')
        .trim();
    Some(text.to_lowercase())
}

/// Lines following the first heading named in `names`, up to the next heading.
fn section<'a>(raw: &'a str, names: &[&str]) -> Option<Vec<&'a str>> {
    let mut lines = raw.lines();
    lines.find(|line| heading_text(line).is_some_and(|h| names.contains(&h.as_str())))?;
    Some(
        lines
            .take_while(|line| heading_text(line).is_none())
            .collect(),
    )
}

/// Value of a `Label: value` line for any of `names`.
fn labeled_line(raw: &str, names: &[&str]) -> Option<String> {
    raw.lines().find_map(|line| {
        let stripped = line.trim().trim_start_matches('#').trim().replace("**", "");
        let (label, value) = stripped.split_once(':')?;
        let label = label.trim().to_lowercase();
        let value = value.trim();
        (names.contains(&label.as_str()) && !value.is_empty()).then(|| value.to_string())
    })
}

fn paragraph(lines: &[&str]) -> Option<String> {
    let text = lines
        .iter()
        .map(|l| l.trim())
        .skip_while(|l| l.is_empty())
        .take_while(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn text_labeled(raw: &str, names: &[&str]) -> Option<String> {
    labeled_line(raw, names).or_else(|| section(raw, names).and_then(|lines| paragraph(&lines)))
}

fn text_summary(raw: &str) -> Option<String> {
    text_labeled(raw, &["summary", "overview"])
}

fn text_list(raw: &str, names: &[&str]) -> Option<Vec<String>> {
    let lines = section(raw, names)?;
    let items: Vec<String> = lines
        .iter()
        .filter_map(|line| BULLET.captures(line))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().replace("**", "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn text_tech_stack(raw: &str) -> Option<Vec<String>> {
    const NAMES: &[&str] = &["tech stack", "technology stack", "technologies", "tech_stack"];
    if let Some(line) = labeled_line(raw, NAMES) {
        let items = split_items(&line);
        if !items.is_empty() {
            return Some(items);
        }
    }
    text_list(raw, NAMES)
}

fn text_complexity(raw: &str) -> Option<u8> {
    COMPLEXITY
        .captures_iter(raw)
        .filter_map(|c| c.get(1)?.as_str().parse::<u8>().ok())
        .find(|n| (1..=10).contains(n))
}

fn text_components(raw: &str) -> Option<Vec<KeyComponent>> {
    let items = text_list(raw, &["key components", "components", "key_components"])?;
    Some(items.iter().map(|s| component_from_line(s)).collect())
}

/// `Name: purpose`, `Name - purpose`, or just `Name`.
fn component_from_line(line: &str) -> KeyComponent {
    let (name, purpose) = line
        .split_once(": ")
        .or_else(|| line.split_once(" - "))
        .or_else(|| line.split_once(" — "))
        .unwrap_or((line, ""));
    KeyComponent {
        name: name.trim().trim_matches('`').to_string(),
        purpose: purpose.trim().to_string(),
        kind: None,
        location: None,
    }
}

fn split_items(s: &str) -> Vec<String> {
    s.split([',', ';', '\n'])
        .map(|item| item.trim().trim_end_matches('.').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup_case_insensitive(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}
