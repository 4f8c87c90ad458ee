//! Configuration for savefmt: which formatter runs for which files, how long it
//! may take, where working copies are staged, and which paths are left alone.
//!
//! The file is TOML (`.savefmt.toml`, `savefmt.toml` or `.config/savefmt.toml`),
//! discovered by walking upward from the working directory:
//!
//! ```toml
//! timeout = 10000
//! exclude = ["target", "*.min.js"]
//!
//! [formatter]
//! command = ["prettier", "--write"]
//!
//! [formatters.rs]
//! command = ["rustfmt"]
//! args = ["--edition", "2024"]
//! ```

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::staging::StagingArea;

/// File names checked, in order, in each directory during discovery.
pub const CONFIG_FILES: &[&str] = &[".savefmt.toml", "savefmt.toml", ".config/savefmt.toml"];

const MAX_DEPTH: usize = 100; // Prevent infinite traversal

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Timeout per formatter run in milliseconds; 0 disables it (default: 30000)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Directory for staged working copies (default: next to the original file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Glob patterns for files that are never formatted
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Respect .gitignore files when walking directories (default: true)
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,

    /// Formatter used when no extension-specific one matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatter: Option<ToolDefinition>,

    /// Formatters keyed by file extension (without the dot)
    #[serde(default)]
    pub formatters: BTreeMap<String, ToolDefinition>,
}

fn default_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            staging_dir: None,
            exclude: Vec::new(),
            respect_gitignore: true,
            formatter: None,
            formatters: BTreeMap::new(),
        }
    }
}

/// How to invoke one external formatter.
///
/// The staged file's absolute path is appended after `args`; the tool is
/// expected to rewrite that file in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolDefinition {
    /// Command to run (first element is the binary, rest are arguments)
    pub command: Vec<String>,

    /// Additional arguments placed before the file path
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolDefinition {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            args: Vec::new(),
        }
    }

    /// Binary name, if the command is not empty.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

/// Which formatter runs for which file: per-extension entries over a default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolTable {
    pub default: Option<ToolDefinition>,
    /// Keyed by extension without the leading dot
    pub by_extension: BTreeMap<String, ToolDefinition>,
}

impl ToolTable {
    pub fn for_path(&self, path: &Path) -> Option<&ToolDefinition> {
        select_tool(path, self.default.as_ref(), &self.by_extension)
    }
}

fn select_tool<'a>(
    path: &Path,
    default: Option<&'a ToolDefinition>,
    by_extension: &'a BTreeMap<String, ToolDefinition>,
) -> Option<&'a ToolDefinition> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| by_extension.get(ext))
        .or(default)
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file at {path}: {source}")]
    IoError { source: io::Error, path: String },

    /// Failed to parse the configuration content
    #[error("Failed to parse config {path}: {message}")]
    ParseError { path: String, message: String },

    /// Parsed, but semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Configuration file already exists
    #[error("Configuration file already exists at {path}")]
    FileExists { path: String },
}

impl Config {
    /// Parse and validate a TOML document. `origin` only labels errors.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from an explicit path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load `explicit` if given, otherwise the first config found walking upward
    /// from `start_dir`, otherwise defaults. Also returns the file that was used.
    pub fn load_with_discovery(
        explicit: Option<&Path>,
        start_dir: &Path,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            log::debug!("[savefmt-config] Using explicit config: {}", path.display());
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        match discover_config_upward(start_dir) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => {
                log::debug!("[savefmt-config] No config file found, using defaults");
                Ok((Self::default(), None))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(formatter) = &self.formatter
            && formatter.command.is_empty()
        {
            return Err(ConfigError::Invalid("[formatter] has an empty command".to_string()));
        }

        for (extension, formatter) in &self.formatters {
            if extension.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "[formatters.\"{extension}\"] should be written without the leading dot"
                )));
            }
            if formatter.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "[formatters.{extension}] has an empty command"
                )));
            }
        }

        // Surface bad globs at load time rather than on the first save
        build_glob_set(&self.exclude)?;
        Ok(())
    }

    /// Formatter for `path`: the extension-specific one if configured, else the default.
    pub fn tool_for(&self, path: &Path) -> Option<&ToolDefinition> {
        select_tool(path, self.formatter.as_ref(), &self.formatters)
    }

    /// The formatter selection of this config, detached from the rest of it.
    pub fn tool_table(&self) -> ToolTable {
        ToolTable {
            default: self.formatter.clone(),
            by_extension: self.formatters.clone(),
        }
    }

    pub fn staging_area(&self) -> StagingArea {
        match &self.staging_dir {
            Some(dir) => StagingArea::Directory(dir.clone()),
            None => StagingArea::Adjacent,
        }
    }

    /// Matcher for the `exclude` patterns, relative to `base`.
    pub fn exclude_matcher(&self, base: &Path) -> Result<ExcludeMatcher, ConfigError> {
        Ok(ExcludeMatcher {
            base: base.to_path_buf(),
            set: build_glob_set(&self.exclude)?,
        })
    }
}

/// Compiled `exclude` patterns.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    base: PathBuf,
    set: GlobSet,
}

impl ExcludeMatcher {
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(&self.base).unwrap_or(path);
        let relative = relative.strip_prefix(".").unwrap_or(relative);
        self.set.is_match(relative)
    }
}

/// Expands directory-style patterns to also match files within them.
/// Pattern "dir/path" becomes ["dir/path", "dir/path/**"].
///
/// Patterns containing glob characters (*, ?, [) are returned unchanged.
fn expand_directory_pattern(pattern: &str) -> Vec<String> {
    if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
        return vec![pattern.to_string()];
    }

    let base = pattern.trim_end_matches('/');
    vec![base.to_string(), format!("{base}/**")]
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        for expanded in expand_directory_pattern(pattern) {
            let glob = Glob::new(&expanded)
                .map_err(|e| ConfigError::Invalid(format!("invalid exclude pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
    }
    builder
        .build()
        .map_err(|e| ConfigError::Invalid(format!("invalid exclude patterns: {e}")))
}

/// Walk upward from `start_dir` looking for a config file, stopping at the first
/// directory that contains `.git`.
pub fn discover_config_upward(start_dir: &Path) -> Option<PathBuf> {
    let mut current_dir = start_dir.to_path_buf();

    for _ in 0..MAX_DEPTH {
        log::debug!("[savefmt-config] Searching for config in: {}", current_dir.display());

        for config_name in CONFIG_FILES {
            let config_path = current_dir.join(config_name);
            if config_path.is_file() {
                log::debug!("[savefmt-config] Found config file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if current_dir.join(".git").exists() {
            log::debug!("[savefmt-config] Stopping at .git directory");
            return None;
        }

        if !current_dir.pop() {
            log::debug!("[savefmt-config] Reached filesystem root");
            return None;
        }
    }

    log::debug!("[savefmt-config] Maximum traversal depth reached");
    None
}

/// Write a commented starter configuration to `path`.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::FileExists {
            path: path.display().to_string(),
        });
    }

    let default_config = r#"# savefmt configuration file

# Maximum time a formatter may run, in milliseconds (0 = no limit)
timeout = 30000

# Stage working copies in a dedicated directory instead of next to each file
# staging-dir = "/tmp/savefmt"

# Files and directories that are never formatted
exclude = [
    ".git",
    "target",
    "node_modules",
]

# Respect .gitignore files when scanning directories
respect-gitignore = true

# Default formatter. The staged file path is appended as the last argument,
# and the formatter must rewrite that file in place.
# [formatter]
# command = ["prettier", "--write"]

# Formatters per file extension
# [formatters.rs]
# command = ["rustfmt"]
# args = ["--edition", "2024"]
#
# [formatters.py]
# command = ["ruff", "format"]
"#;

    fs::write(path, default_config).map_err(|source| ConfigError::IoError {
        source,
        path: path.display().to_string(),
    })
}
