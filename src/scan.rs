use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// One markdown file as handed to the parser.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the scan root, forward-slash normalized.
    pub rel_path: String,
    pub text: String,
    pub modified: DateTime<Utc>,
}

/// Files under `root` matching `pattern` (e.g. `**/*.md`), sorted by path.
/// Only `pattern` is a glob; the root is matched literally.
pub fn find_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let root_text = root.to_string_lossy();
    let escaped = glob::Pattern::escape(root_text.trim_end_matches(['/', '\\']));
    let full = format!("{}/{}", escaped, pattern.trim_start_matches(['/', '\\']));
    let mut files: Vec<PathBuf> = glob::glob(&full)
        .with_context(|| format!("invalid file pattern {:?}", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable path while scanning");
                None
            }
        })
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn read_source(root: &Path, path: &Path) -> Result<SourceFile> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("stat {}", path.display()))?;
    Ok(SourceFile {
        rel_path: relative_path(root, path),
        text,
        modified: DateTime::<Utc>::from(modified),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_nested_markdown_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/deep")).unwrap();
        fs::write(dir.path().join("b/deep/z.md"), "# Z").unwrap();
        fs::write(dir.path().join("a.md"), "# A").unwrap();
        fs::write(dir.path().join("skip.txt"), "nope").unwrap();

        let files = find_files(dir.path(), "**/*.md").unwrap();
        let rel: Vec<String> = files.iter().map(|p| relative_path(dir.path(), p)).collect();
        assert_eq!(rel, vec!["a.md", "b/deep/z.md"]);
    }

    #[test]
    fn reads_text_and_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes").join("n.md");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "## Plan\n").unwrap();

        let src = read_source(dir.path(), &path).unwrap();
        assert_eq!(src.rel_path, "notes/n.md");
        assert_eq!(src.text, "## Plan\n");
        assert!(src.modified.timestamp() > 0);
    }

    #[test]
    fn root_with_glob_characters_is_literal() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("notes [draft]*?");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.md"), "# A").unwrap();
        fs::write(root.join("sub/b.md"), "# B").unwrap();

        let files = find_files(&root, "**/*.md").unwrap();
        let rel: Vec<String> = files.iter().map(|p| relative_path(&root, p)).collect();
        assert_eq!(rel, vec!["a.md", "sub/b.md"]);
    }

    #[test]
    fn bad_pattern_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(find_files(dir.path(), "[").is_err());
    }
}
