use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File, FileFormat, Source};
use serde::Deserialize;
use tracing::debug;

pub const ENV_FILE: &str = ".sqldown.env";
const ENV_PREFIX: &str = "SQLDOWN";

/// Effective settings after the file/environment cascade. CLI flags are
/// applied on top by the command handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db: Option<PathBuf>,
    pub table: Option<String>,
    pub pattern: String,
    pub max_columns: usize,
    pub top_sections: usize,
    pub warn_fraction: f64,
    pub verbose: bool,
}

/// A `.sqldown.env` file: `KEY=value` lines, keys with or without the
/// `SQLDOWN_` prefix.
#[derive(Debug, Clone)]
struct EnvFile(PathBuf);

impl Source for EnvFile {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<config::Map<String, config::Value>, ConfigError> {
        let raw = File::from(self.0.as_path())
            .format(FileFormat::Ini)
            .required(false)
            .collect()?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| (normalize_key(&key), value))
            .collect())
    }
}

fn normalize_key(key: &str) -> String {
    let key = key.trim().to_lowercase();
    match key.strip_prefix("sqldown_") {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// `.sqldown.env` files in increasing precedence: git root, working
/// directory, markdown directory. A file reached twice is read once.
pub fn env_files(cwd: &Path, markdown_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(root) = find_git_root(cwd) {
        dirs.push(root);
    }
    dirs.push(cwd.to_path_buf());
    if let Some(dir) = markdown_dir {
        dirs.push(dir.to_path_buf());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        let file = dir.join(ENV_FILE);
        let key = file.canonicalize().unwrap_or_else(|_| file.clone());
        if file.is_file() && !files.iter().any(|f| f.canonicalize().ok().as_ref() == Some(&key)) {
            files.push(file);
        }
    }
    files
}

/// Build settings from defaults, the env-file cascade and `SQLDOWN_*`
/// variables. `env` replaces the process environment when given.
pub fn load_settings(
    cwd: &Path,
    markdown_dir: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<Settings> {
    let mut builder = Config::builder()
        .set_default("pattern", "**/*.md")?
        .set_default("max_columns", 1800)?
        .set_default("top_sections", 20)?
        .set_default("warn_fraction", 0.9)?
        .set_default("verbose", false)?;

    for file in env_files(cwd, markdown_dir) {
        debug!(file = %file.display(), "loading env file");
        builder = builder.add_source(EnvFile(file));
    }

    let settings = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
        .build()
        .context("failed to assemble configuration")?
        .try_deserialize::<Settings>()
        .context("invalid sqldown configuration")?;
    Ok(settings)
}

/// `<git root>/.sqldown.db` inside a repository, `./sqldown.db` otherwise.
pub fn default_database_path(cwd: &Path) -> PathBuf {
    match find_git_root(cwd) {
        Some(root) => root.join(".sqldown.db"),
        None => cwd.join("sqldown.db"),
    }
}

/// Table name derived from a directory name, safe to use unquoted in SQL.
pub fn infer_table_name(dir: &Path) -> String {
    let resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut table = sanitized.trim_matches('_').to_lowercase();
    if table.starts_with(|c: char| c.is_ascii_digit()) {
        table = format!("table_{}", table);
    }
    if table.is_empty() {
        table = "docs".to_string();
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn no_env() -> Option<HashMap<String, String>> {
        Some(HashMap::new())
    }

    #[test]
    fn defaults_without_files() {
        let dir = tempdir().unwrap();
        let s = load_settings(dir.path(), None, no_env()).unwrap();
        assert_eq!(s.pattern, "**/*.md");
        assert_eq!(s.max_columns, 1800);
        assert_eq!(s.top_sections, 20);
        assert!((s.warn_fraction - 0.9).abs() < f64::EPSILON);
        assert!(!s.verbose);
        assert!(s.db.is_none());
    }

    #[test]
    fn cascade_precedence() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join(".git")).unwrap();
        let work = root.path().join("work");
        let notes = root.path().join("notes");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir_all(&notes).unwrap();

        fs::write(
            root.path().join(ENV_FILE),
            "SQLDOWN_MAX_COLUMNS=500\nSQLDOWN_TOP_SECTIONS=5\nSQLDOWN_TABLE=root\n",
        )
        .unwrap();
        fs::write(work.join(ENV_FILE), "SQLDOWN_TOP_SECTIONS=7\n").unwrap();
        fs::write(notes.join(ENV_FILE), "TABLE=notes\nVERBOSE=yes\n").unwrap();

        let env: HashMap<String, String> =
            [("SQLDOWN_MAX_COLUMNS".to_string(), "900".to_string())].into_iter().collect();
        let s = load_settings(&work, Some(&notes), Some(env)).unwrap();

        assert_eq!(s.max_columns, 900);
        assert_eq!(s.top_sections, 7);
        assert_eq!(s.table.as_deref(), Some("notes"));
        assert!(s.verbose);
    }

    #[test]
    fn same_file_is_read_once() {
        let root = tempdir().unwrap();
        fs::write(root.path().join(ENV_FILE), "SQLDOWN_PATTERN=*.markdown\n").unwrap();
        let files = env_files(root.path(), Some(root.path()));
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn database_default_prefers_git_root() {
        let root = tempdir().unwrap();
        let nested = root.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(default_database_path(&nested), nested.join("sqldown.db"));

        fs::create_dir(root.path().join(".git")).unwrap();
        assert_eq!(default_database_path(&nested), root.path().join(".sqldown.db"));
    }

    #[test]
    fn table_names() {
        assert_eq!(infer_table_name(Path::new("/tmp/My Notes")), "my_notes");
        assert_eq!(infer_table_name(Path::new("/data/2024-tasks")), "table_2024_tasks");
        assert_eq!(infer_table_name(Path::new("/data/__x__")), "x");
        assert_eq!(infer_table_name(Path::new("/")), "docs");
    }
}
