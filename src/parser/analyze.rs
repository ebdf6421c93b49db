use std::collections::{BTreeSet, HashMap, HashSet};

use super::document::ParsedDocument;
use super::flatten::slugify;

/// Normalized section names that may become columns.
pub type AllowList = BTreeSet<String>;

/// Number of documents each normalized section name appears in.
/// A heading repeated inside one document counts once.
pub fn section_document_counts(docs: &[ParsedDocument]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        let seen: HashSet<String> = doc.section_names().map(slugify).collect();
        for name in seen {
            *counts.entry(name).or_default() += 1;
        }
    }
    counts
}

/// Pick the `limit` most common section names across the corpus.
///
/// Ties are ordered by name so the result does not depend on document order.
/// `limit == 0` keeps every name seen.
pub fn analyze(docs: &[ParsedDocument], limit: usize) -> AllowList {
    let counts = section_document_counts(docs);
    if limit == 0 {
        return counts.into_keys().collect();
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::document::parse;
    use chrono::{DateTime, Utc};

    fn doc(path: &str, headings: &[&str]) -> ParsedDocument {
        let text: String = headings
            .iter()
            .map(|h| format!("## {}\n\nbody of {}\n\n", h, h))
            .collect();
        parse(path, &text, DateTime::<Utc>::UNIX_EPOCH).unwrap()
    }

    fn set(names: &[&str]) -> AllowList {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn most_common_wins() {
        let a = doc("a.md", &["Plan", "Notes"]);
        let b = doc("b.md", &["Plan", "Status"]);
        assert_eq!(analyze(&[a, b], 1), set(&["plan"]));
    }

    #[test]
    fn ties_break_by_name() {
        let a = doc("a.md", &["Zeta", "Alpha"]);
        let b = doc("b.md", &["Mid"]);
        assert_eq!(analyze(&[a, b], 2), set(&["alpha", "mid"]));
    }

    #[test]
    fn repeated_heading_counts_once_per_document() {
        let a = doc("a.md", &["Notes", "notes", "NOTES"]);
        let b = doc("b.md", &["Plan"]);
        let c = doc("c.md", &["Plan"]);
        assert_eq!(analyze(&[a, b, c], 1), set(&["plan"]));

        let counts = section_document_counts(&[doc("x.md", &["Notes", "Notes"])]);
        assert_eq!(counts["notes"], 1);
    }

    #[test]
    fn order_independent() {
        let docs = vec![
            doc("a.md", &["One", "Two"]),
            doc("b.md", &["Two", "Three"]),
            doc("c.md", &["Three", "Four"]),
            doc("d.md", &["Four", "One"]),
        ];
        let forward = analyze(&docs, 2);
        let mut reversed = docs.clone();
        reversed.reverse();
        assert_eq!(forward, analyze(&reversed, 2));
        let mut rotated = docs;
        rotated.rotate_left(1);
        assert_eq!(forward, analyze(&rotated, 2));
    }

    #[test]
    fn zero_means_everything() {
        let a = doc("a.md", &["Plan", "Notes"]);
        let b = doc("b.md", &["Status"]);
        assert_eq!(analyze(&[a, b], 0), set(&["notes", "plan", "status"]));
    }

    #[test]
    fn limit_larger_than_corpus() {
        let a = doc("a.md", &["Plan", "Notes"]);
        assert_eq!(analyze(&[a], 50), set(&["notes", "plan"]));
    }

    #[test]
    fn empty_corpus() {
        assert!(analyze(&[], 5).is_empty());
        assert!(analyze(&[], 0).is_empty());
    }
}
