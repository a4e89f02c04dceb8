//! Parse-then-validate for oracle extraction output
//!
//! The oracle is asked for `{"triples": [...]}` but is not trusted to
//! produce exactly that. Recoverable noise (code fences, prose around the
//! JSON, a bare array, a wrapper under another key) is accepted; anything
//! that still does not yield a list fails the whole response. Individual candidates that violate the triple shape
//! are dropped and reported as rejections.

use medground_core::{GroundingError, Result, Triple};
use serde_json::Value;

use crate::{ExtractionOutcome, Rejection};

/// Keys under which oracles commonly nest the triple list
const LIST_KEYS: [&str; 4] = ["triples", "relationships", "relations", "facts"];

/// Parse a raw oracle response into validated triples
pub fn parse_response(response: &str) -> Result<ExtractionOutcome> {
    let body = strip_code_fence(response);
    let value = parse_json(body).ok_or_else(|| {
        GroundingError::MalformedExtractionOutput(format!(
            "response is not JSON: {}",
            preview(body)
        ))
    })?;

    let mut outcome = ExtractionOutcome::default();
    for (index, candidate) in candidate_list(value)?.into_iter().enumerate() {
        match serde_json::from_value::<Triple>(candidate) {
            Ok(triple) => outcome.triples.push(triple),
            Err(e) => outcome.rejected.push(Rejection {
                index,
                reason: e.to_string(),
            }),
        }
    }

    Ok(outcome)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| embedded_json(text))
}

/// Parse the outermost `[...]` or `{...}` span, whichever opens first
fn embedded_json(text: &str) -> Option<Value> {
    let mut spans: Vec<(usize, usize)> = [('[', ']'), ('{', '}')]
        .iter()
        .filter_map(|&(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (start < end).then_some((start, end))
        })
        .collect();
    spans.sort_by_key(|&(start, _)| start);

    spans
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str(&text[start..=end]).ok())
}

fn candidate_list(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            if map.contains_key("subject") {
                return Ok(vec![Value::Object(map)]);
            }
            if map.is_empty() {
                return Ok(Vec::new());
            }

            // A wrapper under an unexpected key, e.g. {"results": [...]}
            let mut lists = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (lists.next(), lists.next()) {
                (Some(items), None) => Ok(items),
                (Some(_), Some(_)) => Err(GroundingError::MalformedExtractionOutput(
                    "object contains more than one list".to_string(),
                )),
                (None, _) => Err(GroundingError::MalformedExtractionOutput(
                    "object contains no list of triples".to_string(),
                )),
            }
        }
        other => Err(GroundingError::MalformedExtractionOutput(format!(
            "expected a list of triples, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(text: &str) -> String {
    const MAX_PREVIEW: usize = 80;
    if text.chars().count() <= MAX_PREVIEW {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_PREVIEW).collect();
    format!("{head}...")
}
