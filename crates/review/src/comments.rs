//! Turning raw model replies into [`Comment`]s bound to a section.

use apiview_protocol::{Comment, CommentSource, Severity};
use apiview_sectioner::Section;
use serde_json::Value;
use std::collections::BTreeSet;

const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Ids a section's comments may cite.
#[derive(Debug, Clone, Default)]
pub struct KnownIds {
    pub guidelines: BTreeSet<String>,
    pub memories: BTreeSet<String>,
}

impl KnownIds {
    pub fn from_context(context: &apiview_search::Context) -> Self {
        Self {
            guidelines: context.guideline_ids().into_iter().map(str::to_string).collect(),
            memories: context.memory_ids().into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub comments: Vec<Comment>,
    /// Entries dropped for an unusable line number or missing text.
    pub malformed: usize,
}

/// Normalize a `{"comments": [...]}` reply (or a bare array) from one prompt.
///
/// Line numbers stay in the section's numbering.
pub fn normalize_reply(
    reply: &Value,
    source: CommentSource,
    section: &Section,
    known: &KnownIds,
) -> Normalized {
    let entries = match reply {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("comments") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    let mut out = Normalized::default();
    for entry in entries {
        match normalize_entry(entry, source, section, known) {
            Some(comments) => out.comments.extend(comments),
            None => out.malformed += 1,
        }
    }
    out
}

fn normalize_entry(
    entry: &Value,
    source: CommentSource,
    section: &Section,
    known: &KnownIds,
) -> Option<Vec<Comment>> {
    let obj = entry.as_object()?;
    let text = obj.get("text").and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }
    let line_nos = obj.get("line_no").map(parse_line_numbers).unwrap_or_default();
    if line_nos.is_empty() {
        return None;
    }

    let code = obj
        .get("code")
        .or_else(|| obj.get("code_excerpt"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .map_or(Severity::Suggestion, Severity::parse_lenient);
    let confidence = parse_confidence(obj.get("confidence"));
    let suggestion = obj
        .get("suggestion")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string);
    let guideline_ids = resolve_ids(obj.get("guideline_ids"), &known.guidelines);
    let memory_ids = resolve_ids(obj.get("memory_ids"), &known.memories);

    let mut comments = Vec::with_capacity(line_nos.len());
    for line_no in line_nos {
        if section.line(line_no).is_none() {
            log::debug!(
                "section {}: comment on line {line_no} is outside the section",
                section.chunk_index
            );
            continue;
        }
        let line_no = correct_line(section, line_no, &code);
        let mut comment = Comment {
            line_no: u32::try_from(line_no).ok()?,
            code_excerpt: code.clone(),
            text: text.to_string(),
            severity,
            guideline_ids: guideline_ids.clone(),
            memory_ids: memory_ids.clone(),
            confidence,
            is_generic: false,
            correlation_id: None,
            suggestion: suggestion.clone(),
            source,
        };
        comment.normalize_generic();
        comments.push(comment);
    }
    if comments.is_empty() {
        None
    } else {
        Some(comments)
    }
}

/// `12`, `"12"`, `"10-20"` (first number) and `"10, 20"` (each number).
pub fn parse_line_numbers(raw: &Value) -> Vec<usize> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .into_iter()
            .collect(),
        Value::String(s) => s
            .split(',')
            .filter_map(|part| {
                let first = part.trim().split('-').next()?.trim();
                first.parse::<usize>().ok().filter(|v| *v > 0)
            })
            .collect(),
        Value::Array(items) => items.iter().flat_map(parse_line_numbers).collect(),
        _ => Vec::new(),
    }
}

fn parse_confidence(raw: Option<&Value>) -> f32 {
    let value = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => (v as f32).clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Move a comment to the nearby line that actually holds its excerpt.
fn correct_line(section: &Section, line_no: usize, code: &str) -> usize {
    section.locate_excerpt(line_no, code).unwrap_or(line_no)
}

fn resolve_ids(raw: Option<&Value>, known: &BTreeSet<String>) -> Vec<String> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    let mut resolved: Vec<String> = Vec::new();
    for item in items.iter().filter_map(Value::as_str) {
        match resolve_id(item, known) {
            Some(id) if !resolved.contains(&id) => resolved.push(id),
            Some(_) => {}
            None => log::debug!("dropping unknown reference {item}"),
        }
    }
    resolved
}

/// Exact match first, then a match on the anchor after `=html=` or `#`.
pub fn resolve_id(raw: &str, known: &BTreeSet<String>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if known.contains(raw) {
        return Some(raw.to_string());
    }
    let anchor = anchor_of(raw);
    if anchor.is_empty() {
        return None;
    }
    known.iter().find(|k| anchor_of(k) == anchor).cloned()
}

fn anchor_of(id: &str) -> &str {
    let tail = id.rsplit("=html=").next().unwrap_or(id);
    tail.rsplit('#').next().unwrap_or(tail).trim()
}
