use serde_json::Value as JsonValue;

use super::flatten::{frontmatter_key, section_column};
use crate::error::{Error, Result};
use crate::record::{self, classify_column, ColumnKind, FlatRecord, Value};

/// Rebuild markdown from a flat record (a stored row or fresh flatten output).
///
/// Sections come back in `_sections` order; a heading that is not listed
/// there is never emitted, even if its column holds text.
pub fn reconstruct(row: &FlatRecord) -> Result<String> {
    let id = row.text(record::ID).filter(|s| !s.is_empty());
    let path = row.text(record::PATH).filter(|s| !s.is_empty());
    let path = match (id, path) {
        (Some(_), Some(path)) => path,
        (None, Some(path)) => {
            return Err(Error::MissingPath {
                id: path.to_string(),
                field: record::ID,
            })
        }
        (id, None) => {
            return Err(Error::MissingPath {
                id: id.unwrap_or("unknown").to_string(),
                field: record::PATH,
            })
        }
    };

    let headings = section_order(path, row)?;
    let mut parts: Vec<String> = Vec::new();

    let block = frontmatter_block(path, row)?;
    let has_frontmatter = block.is_some();
    parts.extend(block);

    let title = row.text(record::TITLE).unwrap_or_default();
    let (lead, from_body) = match row.get(record::LEAD) {
        Some(Value::Null) | None => (row.text(record::BODY).unwrap_or_default(), true),
        Some(v) => (v.as_text().unwrap_or_default(), false),
    };
    if !title.is_empty() && !(from_body && contains_title_line(lead, title)) {
        parts.push(format!("# {}", title));
    }
    let lead = trim_blank_lines(lead);
    if !lead.is_empty() {
        parts.push(lead);
    }

    for heading in &headings {
        let content = row
            .get(&section_column(heading))
            .map(|v| v.to_string())
            .unwrap_or_default();
        let content = trim_blank_lines(&content);
        if content.is_empty() {
            parts.push(format!("## {}", heading));
        } else {
            parts.push(format!("## {}\n\n{}", heading, content));
        }
    }

    // Text that opens with a delimiter line would be read back as frontmatter.
    let needs_guard = parts
        .first()
        .and_then(|p| p.lines().next())
        .is_some_and(|l| l.trim_end() == "---")
        && !has_frontmatter;
    if needs_guard {
        parts.insert(0, "---\n---".to_string());
    }

    let mut out = parts.join("\n\n");
    out.push('\n');
    Ok(out)
}

fn section_order(path: &str, row: &FlatRecord) -> Result<Vec<String>> {
    match row.get(record::SECTIONS) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Text(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::Text(s)) => serde_json::from_str(s).map_err(|e| Error::MalformedRecord {
            path: path.to_string(),
            reason: format!("{} is not a list of headings: {}", record::SECTIONS, e),
        }),
        Some(other) => Err(Error::MalformedRecord {
            path: path.to_string(),
            reason: format!("{} holds {:?}", record::SECTIONS, other),
        }),
    }
}

/// Drop blank lines around `text` and nothing else: a first line's
/// indentation can be an indented code block.
fn trim_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// A `body` fallback from a section-less document still carries its own title.
fn contains_title_line(text: &str, title: &str) -> bool {
    text.lines()
        .any(|l| l.strip_prefix("# ").is_some_and(|t| t.trim() == title))
}

fn frontmatter_block(path: &str, row: &FlatRecord) -> Result<Option<String>> {
    let mut mapping = serde_json::Map::new();
    for (column, value) in row.iter() {
        if classify_column(column) != ColumnKind::Frontmatter || value.is_blank() {
            continue;
        }
        mapping.insert(frontmatter_key(column).to_string(), value_to_json(value));
    }
    if mapping.is_empty() {
        return Ok(None);
    }

    let yaml = serde_yaml::to_string(&JsonValue::Object(mapping)).map_err(|e| {
        Error::MalformedRecord {
            path: path.to_string(),
            reason: format!("frontmatter cannot be written as YAML: {}", e),
        }
    })?;
    Ok(Some(format!("---\n{}---", yaml)))
}

/// Undo the flattening of lists and mappings into JSON text.
fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(i) => JsonValue::from(*i),
        Value::Real(r) => JsonValue::from(*r),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Text(s) => {
            let t = s.trim_start();
            if t.starts_with('[') || t.starts_with('{') {
                match serde_json::from_str::<JsonValue>(s) {
                    Ok(v @ (JsonValue::Array(_) | JsonValue::Object(_))) => return v,
                    _ => {}
                }
            }
            JsonValue::String(s.clone())
        }
    }
}
