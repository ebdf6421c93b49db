use std::collections::HashSet;

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::analyze::AllowList;
use super::document::ParsedDocument;
use crate::record::{self, FlatRecord, Value, CORE_FIELDS, RENAME_PREFIX, SECTION_PREFIX};

/// Column-safe form of a heading: lowercase, non-alphanumeric runs become `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

pub fn section_column(heading: &str) -> String {
    format!("{}{}", SECTION_PREFIX, slugify(heading))
}

/// Stable row identity: SHA-256 of the forward-slash path.
pub fn record_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.replace('\\', "/").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SQLite column names ignore ASCII case, so reserved names do too.
fn is_reserved_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    CORE_FIELDS.contains(&lower.as_str())
        || lower.starts_with('_')
        || lower.starts_with(SECTION_PREFIX)
        || lower.starts_with(RENAME_PREFIX)
}

/// Column a frontmatter key is stored under. Reserved keys get `fm_` in front,
/// which keeps the mapping one-to-one.
pub fn frontmatter_column(key: &str) -> String {
    if is_reserved_key(key) {
        format!("{}{}", RENAME_PREFIX, key)
    } else {
        key.to_string()
    }
}

/// Inverse of [`frontmatter_column`].
pub fn frontmatter_key(column: &str) -> &str {
    column.strip_prefix(RENAME_PREFIX).unwrap_or(column)
}

/// Scalars map one to one; lists and mappings become compact JSON text.
pub fn json_to_value(v: &JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(v.to_string()),
    }
}

/// What flattening left out of, or renamed in, one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenReport {
    /// Headings not in the allow-list.
    pub filtered: Vec<String>,
    /// Headings whose slug was already taken by an earlier section.
    pub collisions: Vec<String>,
    /// (frontmatter key, column) pairs for keys that shadowed a reserved name.
    pub renamed: Vec<(String, String)>,
    /// Frontmatter keys dropped because an earlier key maps to the same
    /// column once case is ignored.
    pub case_clashes: Vec<String>,
}

impl FlattenReport {
    pub fn is_lossless(&self) -> bool {
        self.filtered.is_empty() && self.collisions.is_empty() && self.case_clashes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Flattened {
    pub record: FlatRecord,
    pub report: FlattenReport,
}

/// Map a parsed document onto one flat record.
///
/// `allow` holds normalized section names; `None` keeps every section. When
/// two headings share a slug the first one wins and the rest are reported.
pub fn flatten(doc: &ParsedDocument, allow: Option<&AllowList>) -> Flattened {
    let mut record = FlatRecord::new();
    let mut report = FlattenReport::default();

    // Keys come in byte order, so `Status` is kept over `status`.
    let mut columns: HashSet<String> = HashSet::new();
    for (key, value) in &doc.frontmatter {
        let column = frontmatter_column(key);
        if !columns.insert(column.to_ascii_lowercase()) {
            report.case_clashes.push(key.clone());
            continue;
        }
        if column != *key {
            report.renamed.push((key.clone(), column.clone()));
        }
        record.insert(column, json_to_value(value));
    }

    let mut taken: HashSet<String> = HashSet::new();
    let mut retained: Vec<String> = Vec::new();
    for section in &doc.sections {
        let slug = slugify(&section.name);
        if let Some(allowed) = allow {
            if !allowed.contains(&slug) {
                report.filtered.push(section.name.clone());
                continue;
            }
        }
        if !taken.insert(slug.clone()) {
            report.collisions.push(section.name.clone());
            continue;
        }
        record.insert(format!("{}{}", SECTION_PREFIX, slug), section.body.as_str());
        retained.push(section.name.clone());
    }

    let body = if doc.sections.is_empty() {
        doc.raw_body.as_str()
    } else {
        doc.lead.as_str()
    };

    record.insert(record::ID, record_id(&doc.path));
    record.insert(record::PATH, doc.path.replace('\\', "/"));
    record.insert(record::SECTIONS, JsonValue::from(retained).to_string());
    record.insert(record::TITLE, doc.title.as_str());
    record.insert(record::BODY, body);
    record.insert(record::LEAD, doc.lead.as_str());
    record.insert(record::FILE_MODIFIED, doc.file_modified.to_rfc3339());

    if !report.filtered.is_empty() {
        debug!(path = %doc.path, filtered = ?report.filtered, "sections outside allow-list dropped");
    }
    if !report.collisions.is_empty() {
        debug!(path = %doc.path, collisions = ?report.collisions, "duplicate section slugs dropped");
    }
    if !report.case_clashes.is_empty() {
        debug!(path = %doc.path, keys = ?report.case_clashes, "frontmatter keys differing only by case dropped");
    }

    Flattened { record, report }
}
