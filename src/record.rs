use std::collections::BTreeMap;
use std::fmt;

pub const ID: &str = "_id";
pub const PATH: &str = "_path";
pub const SECTIONS: &str = "_sections";
pub const TITLE: &str = "title";
pub const BODY: &str = "body";
pub const LEAD: &str = "lead";
pub const FILE_MODIFIED: &str = "file_modified";

/// Columns every record carries, regardless of its frontmatter or sections.
pub const CORE_FIELDS: [&str; 7] = [ID, PATH, SECTIONS, TITLE, BODY, LEAD, FILE_MODIFIED];

pub const SECTION_PREFIX: &str = "section_";
/// Prefix given to frontmatter keys that would shadow a reserved column.
pub const RENAME_PREFIX: &str = "fm_";

/// A single cell of a flat record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Null and empty text both count as "no value".
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Core,
    Frontmatter,
    Section,
}

pub fn classify_column(name: &str) -> ColumnKind {
    if CORE_FIELDS.contains(&name) {
        ColumnKind::Core
    } else if name.starts_with(SECTION_PREFIX) {
        ColumnKind::Section
    } else {
        ColumnKind::Frontmatter
    }
}

/// Flattened, storage-ready form of one document: column name → value.
///
/// The column set differs from document to document, so this is runtime data
/// rather than a struct. Columns iterate in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    fields: BTreeMap<String, Value>,
}

impl FlatRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Text of a column, treating a missing column and NULL alike.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        FlatRecord {
            fields: iter.into_iter().collect(),
        }
    }
}
