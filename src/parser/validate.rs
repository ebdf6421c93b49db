use std::collections::{BTreeSet, HashSet};

use crate::error::{Error, Result};
use crate::record::{classify_column, ColumnKind, FlatRecord, CORE_FIELDS};

/// Column usage of a whole batch against the configured ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub base: usize,
    pub frontmatter: usize,
    pub sections: usize,
    pub total: usize,
    pub max: usize,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.total <= self.max
    }

    /// Within the limit but at or above `fraction` of it. Advisory only.
    pub fn approaching_limit(&self, fraction: f64) -> bool {
        let threshold = (self.max as f64 * fraction).floor() as usize;
        self.is_valid() && self.total >= threshold
    }

    pub fn check(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(Error::SchemaLimitExceeded(self))
        }
    }
}

/// Every distinct column name the batch needs, core fields included.
///
/// Names are distinct as SQLite sees them, ignoring ASCII case; the first
/// spelling in batch order is the one kept.
pub fn column_union(records: &[FlatRecord]) -> BTreeSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut columns = BTreeSet::new();
    let names = CORE_FIELDS
        .iter()
        .copied()
        .chain(records.iter().flat_map(|r| r.columns()));
    for name in names {
        if seen.insert(name.to_ascii_lowercase()) {
            columns.insert(name.to_string());
        }
    }
    columns
}

/// Count the columns the batch would create. Runs before anything is written:
/// one table holds every record, so the union is what matters.
pub fn validate(records: &[FlatRecord], max_columns: usize) -> SchemaReport {
    let mut frontmatter = 0;
    let mut sections = 0;
    for name in column_union(records) {
        match classify_column(&name) {
            ColumnKind::Core => {}
            ColumnKind::Frontmatter => frontmatter += 1,
            ColumnKind::Section => sections += 1,
        }
    }

    let base = CORE_FIELDS.len();
    SchemaReport {
        base,
        frontmatter,
        sections,
        total: base + frontmatter + sections,
        max: max_columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::document::parse;
    use crate::parser::flatten::flatten;
    use chrono::{DateTime, Utc};

    fn record(path: &str, text: &str) -> FlatRecord {
        let doc = parse(path, text, DateTime::<Utc>::UNIX_EPOCH).unwrap();
        flatten(&doc, None).record
    }

    #[test]
    fn empty_batch_is_base_only() {
        let report = validate(&[], 1800);
        assert_eq!(report.base, 7);
        assert_eq!(report.total, 7);
        assert!(report.check().is_ok());
    }

    #[test]
    fn union_across_records() {
        let a = record("a.md", "---\nstatus: x\n---\n## Plan\n\np\n");
        let b = record("b.md", "---\nowner: y\nstatus: z\n---\n## Plan\n\nq\n## Risks\n\nr\n");
        let report = validate(&[a, b], 100);
        assert_eq!(report.frontmatter, 2);
        assert_eq!(report.sections, 2);
        assert_eq!(report.total, 11);
    }

    #[test]
    fn columns_differing_by_case_count_once() {
        let a = record("a.md", "---\nStatus: x\n---\n");
        let b = record("b.md", "---\nstatus: y\nTitle: t\n---\n# Real\n");
        let union = column_union(&[a.clone(), b.clone()]);
        assert!(union.contains("Status"));
        assert!(!union.contains("status"));
        assert!(union.contains("title"));
        assert!(union.contains("fm_Title"));

        let report = validate(&[a, b], 9);
        assert_eq!(report.frontmatter, 2);
        assert_eq!(report.total, 9);
        assert!(report.is_valid());
    }

    #[test]
    fn over_limit_is_rejected_with_breakdown() {
        let a = record("a.md", "---\none: 1\ntwo: 2\n---\n## S\n\nx\n");
        let err = validate(&[a], 9).check().unwrap_err();
        match err {
            Error::SchemaLimitExceeded(r) => {
                assert_eq!((r.base, r.frontmatter, r.sections, r.total, r.max), (7, 2, 1, 10, 9));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn superset_never_shrinks() {
        let a = record("a.md", "---\nk: 1\n---\n## A\n\nx\n");
        let b = record("b.md", "## B\n\ny\n");
        let small = validate(&[a.clone()], 10);
        let large = validate(&[a, b], 10);
        assert!(large.total >= small.total);

        let tight_small = validate(&[record("c.md", "## C\n\nz\n")], 8);
        let tight_large = validate(
            &[record("c.md", "## C\n\nz\n"), record("d.md", "## D\n\nw\n")],
            8,
        );
        assert!(tight_small.is_valid());
        assert!(!tight_large.is_valid());
    }

    #[test]
    fn warning_threshold_is_advisory() {
        let report = SchemaReport { base: 7, frontmatter: 80, sections: 5, total: 92, max: 100 };
        assert!(report.approaching_limit(0.9));
        assert!(report.clone().check().is_ok());

        let low = SchemaReport { total: 50, ..report.clone() };
        assert!(!low.approaching_limit(0.9));

        let over = SchemaReport { total: 101, ..report };
        assert!(!over.approaching_limit(0.9));
    }
}
