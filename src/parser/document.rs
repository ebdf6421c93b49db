use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#[ \t]+(.*?)[ \t]*$").unwrap());
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^##[ \t]+(.*?)[ \t]*$").unwrap());

const FRONTMATTER_DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Heading text as written, without the `## ` marker.
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub path: String,
    pub frontmatter: BTreeMap<String, JsonValue>,
    pub title: String,
    pub lead: String,
    pub sections: Vec<Section>,
    pub raw_body: String,
    pub file_modified: DateTime<Utc>,
}

impl ParsedDocument {
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }
}

/// Parse one markdown source into frontmatter, title, lead and H2 sections.
///
/// `path` and `modified` come from the caller; nothing here touches the
/// filesystem.
pub fn parse(path: &str, text: &str, modified: DateTime<Utc>) -> Result<ParsedDocument> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let (yaml, body) = split_frontmatter(path, text)?;
    let frontmatter = match yaml {
        Some(y) => parse_frontmatter(path, y)?,
        None => BTreeMap::new(),
    };

    let split = split_body(body);

    Ok(ParsedDocument {
        path: path.to_string(),
        frontmatter,
        title: split.title.unwrap_or_default(),
        lead: split.lead,
        sections: split.sections,
        raw_body: body.to_string(),
        file_modified: modified,
    })
}

/// Returns the YAML between the delimiters (if any) and the remaining body.
fn split_frontmatter<'a>(path: &str, text: &'a str) -> Result<(Option<&'a str>, &'a str)> {
    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok((None, text));
    };
    if first.trim_end() != FRONTMATTER_DELIMITER {
        return Ok((None, text));
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == FRONTMATTER_DELIMITER {
            let yaml = &text[yaml_start..offset];
            let body = &text[offset + line.len()..];
            return Ok((Some(yaml), body));
        }
        offset += line.len();
    }

    Err(Error::malformed(path, "frontmatter block is never closed"))
}

fn parse_frontmatter(path: &str, yaml: &str) -> Result<BTreeMap<String, JsonValue>> {
    if yaml.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(yaml)
        .map_err(|e| Error::malformed(path, format!("invalid frontmatter: {}", e)))?;
    let json = serde_json::to_value(value)
        .map_err(|e| Error::malformed(path, format!("unrepresentable frontmatter: {}", e)))?;

    match json {
        JsonValue::Null => Ok(BTreeMap::new()),
        JsonValue::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(Error::malformed(path, "frontmatter is not a key/value mapping")),
    }
}

struct BodySplit {
    title: Option<String>,
    lead: String,
    sections: Vec<Section>,
}

/// Single pass over the body lines. Headings inside fenced code are content.
fn split_body(body: &str) -> BodySplit {
    let mut title: Option<String> = None;
    let mut lead: Vec<&str> = Vec::new();
    let mut open: Vec<(String, Vec<&str>)> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in body.lines() {
        match fence {
            Some(marker) => {
                if line.trim_start().starts_with(marker) {
                    fence = None;
                }
            }
            None => {
                if let Some(marker) = fence_marker(line) {
                    fence = Some(marker);
                } else if title.is_none() {
                    if let Some(caps) = TITLE_RE.captures(line) {
                        title = Some(caps[1].to_string());
                        continue;
                    }
                }
                if fence.is_none() {
                    if let Some(caps) = SECTION_RE.captures(line) {
                        open.push((caps[1].to_string(), Vec::new()));
                        continue;
                    }
                }
            }
        }

        match open.last_mut() {
            Some((_, lines)) => lines.push(line),
            None => lead.push(line),
        }
    }

    BodySplit {
        title,
        lead: join_trimmed(&lead),
        sections: open
            .into_iter()
            .map(|(name, lines)| Section {
                name,
                body: join_trimmed(&lines),
            })
            .collect(),
    }
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let t = line.trim_start();
    if t.starts_with("```") {
        Some("```")
    } else if t.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Join lines and drop the blank lines around them, keeping inner layout.
fn join_trimmed(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn task_fixture() {
        let doc = parse("tasks/task.md", &fixture("task.md"), now()).unwrap();
        assert_eq!(doc.path, "tasks/task.md");
        assert_eq!(doc.title, "Migrate the cache layer");
        assert_eq!(doc.frontmatter["status"], JsonValue::String("active".into()));
        assert_eq!(doc.frontmatter["priority"], JsonValue::from(2));
        assert_eq!(doc.frontmatter["tags"].as_array().unwrap().len(), 2);
        assert!(doc.lead.starts_with("The cache currently lives"));
        assert!(doc.lead.ends_with("We want it persisted."));

        let names: Vec<&str> = doc.section_names().collect();
        assert_eq!(names, vec!["Plan", "Notes", "Status"]);
        assert_eq!(doc.sections[2].body, "Blocked on review.");
    }

    #[test]
    fn heading_inside_code_fence_is_content() {
        let doc = parse("task.md", &fixture("task.md"), now()).unwrap();
        let notes = &doc.sections[1];
        assert!(notes.body.contains("## not a heading"));
        assert!(notes.body.ends_with("Keep an eye on latency."));
    }

    #[test]
    fn no_sections_falls_back_to_raw_body() {
        let text = fixture("plain_note.md");
        let doc = parse("plain_note.md", &text, now()).unwrap();
        assert!(doc.frontmatter.is_empty());
        assert!(doc.sections.is_empty());
        assert_eq!(doc.title, "Groceries");
        assert_eq!(doc.raw_body, text);
        assert!(doc.lead.starts_with("- eggs"));
    }

    #[test]
    fn unterminated_frontmatter_is_malformed() {
        let err = parse("bad.md", &fixture("unterminated.md"), now()).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { ref path, .. } if path == "bad.md"));
    }

    #[test]
    fn frontmatter_must_be_a_mapping() {
        let err = parse("list.md", "---\n- a\n- b\n---\nbody", now()).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
    }

    #[test]
    fn empty_frontmatter_block() {
        let doc = parse("e.md", "---\n---\n# T\n", now()).unwrap();
        assert!(doc.frontmatter.is_empty());
        assert_eq!(doc.title, "T");
    }

    #[test]
    fn title_need_not_be_first() {
        let doc = parse("t.md", "intro line\n\n# Late Title\n\nmore\n", now()).unwrap();
        assert_eq!(doc.title, "Late Title");
        assert_eq!(doc.lead, "intro line\n\n\nmore");
    }

    #[test]
    fn missing_title_is_empty() {
        let doc = parse("t.md", "## Only\n\ntext", now()).unwrap();
        assert_eq!(doc.title, "");
        assert_eq!(doc.lead, "");
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn only_first_h1_is_title() {
        let doc = parse("t.md", "# One\n\n## S\n\n# Two\n", now()).unwrap();
        assert_eq!(doc.title, "One");
        assert_eq!(doc.sections[0].body, "# Two");
    }

    #[test]
    fn duplicate_headings_kept_in_source_order() {
        let doc = parse("d.md", &fixture("duplicate_headings.md"), now()).unwrap();
        let names: Vec<&str> = doc.section_names().collect();
        assert_eq!(names, vec!["Notes", "notes", "Next Steps"]);
    }

    #[test]
    fn deeper_headings_stay_in_section_body() {
        let doc = parse("t.md", "## Plan\n### Step one\ndo it\n", now()).unwrap();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].body, "### Step one\ndo it");
    }

    #[test]
    fn bom_and_crlf_frontmatter() {
        let doc = parse("w.md", "\u{feff}---\r\nkind: note\r\n---\r\n# Win\r\n", now()).unwrap();
        assert_eq!(doc.frontmatter["kind"], JsonValue::String("note".into()));
        assert_eq!(doc.title, "Win");
    }

    #[test]
    fn empty_input() {
        let doc = parse("empty.md", "", now()).unwrap();
        assert!(doc.frontmatter.is_empty());
        assert_eq!(doc.title, "");
        assert!(doc.sections.is_empty());
    }
}
