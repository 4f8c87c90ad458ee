//! File discovery for the `format` and `watch` commands

use anyhow::{Result, bail};
use ignore::WalkBuilder;
use savefmt_lib::config::{Config, ExcludeMatcher};
use savefmt_lib::staging::is_staged_path;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Decides which files are eligible for formatting.
pub struct FileFilter<'a> {
    config: &'a Config,
    exclude: ExcludeMatcher,
}

impl<'a> FileFilter<'a> {
    pub fn new(config: &'a Config, base: &Path) -> Result<Self> {
        Ok(Self {
            config,
            exclude: config.exclude_matcher(base)?,
        })
    }

    /// Whether `path` should be formatted when found by walking a directory or
    /// reported by the watcher: a regular file with a configured formatter that
    /// is neither excluded nor one of our own staging artifacts.
    pub fn accepts(&self, path: &Path) -> bool {
        path.is_file()
            && !is_staged_path(path)
            && !self.exclude.is_excluded(path)
            && self.config.tool_for(path).is_some()
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        is_staged_path(path) || self.exclude.is_excluded(path)
    }
}

/// Expand `paths` into the absolute, de-duplicated list of files to format.
///
/// Explicit file arguments are kept even without a configured formatter (so the
/// user hears about it); directory walks only yield files that have one.
pub fn find_files(paths: &[String], config: &Config, base: &Path) -> Result<Vec<PathBuf>> {
    let filter = FileFilter::new(config, base)?;
    let mut files = BTreeSet::new();

    let roots: Vec<&str> = if paths.is_empty() {
        vec!["."]
    } else {
        paths.iter().map(String::as_str).collect()
    };

    for root in roots {
        let root_path = base.join(root);
        if root_path.is_file() {
            if !filter.is_excluded(&root_path) {
                files.insert(absolute(&root_path));
            } else {
                log::debug!("Skipping excluded path: {root}");
            }
            continue;
        }

        if !root_path.is_dir() {
            bail!("Path not found: {root}");
        }

        let walker = WalkBuilder::new(&root_path)
            .git_ignore(config.respect_gitignore)
            .git_global(config.respect_gitignore)
            .git_exclude(config.respect_gitignore)
            .require_git(false)
            .build();

        for entry in walker {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if filter.accepts(path) {
                        files.insert(absolute(path));
                    }
                }
                Err(e) => log::warn!("Error walking {root}: {e}"),
            }
        }
    }

    Ok(files.into_iter().collect())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use savefmt_lib::config::ToolDefinition;
    use std::fs;

    fn rust_only() -> Config {
        let mut config = Config {
            exclude: vec!["vendor".to_string()],
            ..Default::default()
        };
        config.formatters.insert("rs".to_string(), ToolDefinition::new(["rustfmt"]));
        config
    }

    fn names(files: &[PathBuf], base: &Path) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(base).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_walk_only_yields_formattable_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::path::absolute(dir.path()).unwrap();
        fs::create_dir_all(base.join("src")).unwrap();
        fs::create_dir_all(base.join("vendor")).unwrap();
        fs::write(base.join("src/main.rs"), "").unwrap();
        fs::write(base.join("src/notes.md"), "").unwrap();
        fs::write(base.join("src/.main.rs.savefmt-4242-3.rs"), "").unwrap();
        fs::write(base.join("vendor/dep.rs"), "").unwrap();

        let files = find_files(&[], &rust_only(), &base).unwrap();
        assert_eq!(names(&files, &base), vec!["src/main.rs"]);
    }

    #[test]
    fn test_explicit_file_kept_without_formatter() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::path::absolute(dir.path()).unwrap();
        fs::write(base.join("notes.md"), "").unwrap();

        let files = find_files(&["notes.md".to_string()], &rust_only(), &base).unwrap();
        assert_eq!(names(&files, &base), vec!["notes.md"]);
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::path::absolute(dir.path()).unwrap();
        fs::write(base.join(".gitignore"), "generated.rs\n").unwrap();
        fs::write(base.join("generated.rs"), "").unwrap();
        fs::write(base.join("lib.rs"), "").unwrap();

        let files = find_files(&[], &rust_only(), &base).unwrap();
        assert_eq!(names(&files, &base), vec!["lib.rs"]);

        let config = Config {
            respect_gitignore: false,
            ..rust_only()
        };
        let files = find_files(&[], &config, &base).unwrap();
        assert_eq!(names(&files, &base), vec!["generated.rs", "lib.rs"]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::path::absolute(dir.path()).unwrap();
        fs::write(base.join("lib.rs"), "").unwrap();

        let files = find_files(&["lib.rs".to_string(), ".".to_string()], &rust_only(), &base).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_files(&["nope".to_string()], &rust_only(), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Path not found: nope"));
    }
}
