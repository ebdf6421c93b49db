use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql};
use tracing::{debug, warn};

use crate::record::{self, classify_column, ColumnKind, FlatRecord, Value};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
        })
    }
}

fn value_from_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn check_table_name(table: &str) -> Result<()> {
    if table.is_empty() || table.contains('\0') || table.starts_with("sqlite_") {
        bail!("invalid table name {:?}", table);
    }
    Ok(())
}

// ── Schema ──

pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    Ok(table_names(conn)?.iter().any(|t| t == table))
}

pub fn columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt
        .query_map([], |row| row.get(1))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn row_count(conn: &Connection, table: &str) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n as usize)
}

/// Create the table if needed and add any missing columns. Columns get no
/// declared type so each value keeps its own storage class. Names match
/// ignoring ASCII case, as SQLite does. All or nothing: a failed `ALTER`
/// leaves the schema as it was. Returns the number of columns added.
pub fn ensure_columns(conn: &Connection, table: &str, wanted: &BTreeSet<String>) -> Result<usize> {
    check_table_name(table)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY)",
        quote_ident(table),
        quote_ident(record::ID)
    ))?;

    let mut existing: HashSet<String> = columns(&tx, table)?
        .iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let mut added = 0;
    for column in wanted {
        if !existing.insert(column.to_ascii_lowercase()) {
            continue;
        }
        tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ))
        .with_context(|| format!("add column {} to {}", column, table))?;
        added += 1;
    }
    tx.commit()?;
    if added > 0 {
        debug!(table, added, "schema extended");
    }
    Ok(added)
}

// ── Records ──

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl UpsertStats {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Insert or fully replace each record by `_id`. A row that fails is logged
/// and counted; the rest of the batch still commits.
pub fn upsert_records(conn: &Connection, table: &str, records: &[FlatRecord]) -> Result<UpsertStats> {
    check_table_name(table)?;
    let mut stats = UpsertStats::default();
    let exists_sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(record::ID)
    );

    let tx = conn.unchecked_transaction()?;
    for r in records {
        let id = r.text(record::ID).unwrap_or_default();
        let path = r.text(record::PATH).unwrap_or("unknown");
        let existed = tx
            .query_row(&exists_sql, [id], |_| Ok(()))
            .optional()?
            .is_some();

        let names: Vec<String> = r.columns().map(quote_ident).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        );

        let result = tx
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(rusqlite::params_from_iter(r.iter().map(|(_, v)| v))));
        match result {
            Ok(_) if existed => stats.updated += 1,
            Ok(_) => stats.inserted += 1,
            Err(e) => {
                warn!(path, error = %e, "upsert failed");
                stats.failed += 1;
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Every row of `table`, optionally narrowed by a user-supplied SQL `WHERE`
/// clause, ordered by path.
pub fn fetch_rows(conn: &Connection, table: &str, filter: Option<&str>) -> Result<Vec<FlatRecord>> {
    let where_clause = match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => format!(" WHERE {}", f),
        None => String::new(),
    };
    let sql = format!(
        "SELECT * FROM {}{} ORDER BY {}",
        quote_ident(table),
        where_clause,
        quote_ident(record::PATH)
    );

    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("bad query against {}", table))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map([], |row| {
            (0..names.len())
                .map(|i| Ok((names[i].clone(), value_from_ref(row.get_ref(i)?))))
                .collect::<rusqlite::Result<FlatRecord>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Info ──

#[derive(Debug, Default)]
pub struct ColumnBreakdown {
    pub core: usize,
    pub frontmatter: Vec<String>,
    pub sections: Vec<String>,
}

pub fn column_breakdown(columns: &[String]) -> ColumnBreakdown {
    let mut out = ColumnBreakdown::default();
    for c in columns {
        match classify_column(c) {
            ColumnKind::Core => out.core += 1,
            ColumnKind::Frontmatter => out.frontmatter.push(c.clone()),
            ColumnKind::Section => out.sections.push(c.clone()),
        }
    }
    out
}
