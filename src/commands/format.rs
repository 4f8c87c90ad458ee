//! Handler for the `format` command.

use colored::*;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use savefmt_lib::config::Config;
use savefmt_lib::exit_codes::exit;
use savefmt_lib::{CommandFormatter, FileSink, FormatCoordinator, FormatOutcome};

use crate::discovery::find_files;

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileResult {
    Formatted,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub formatted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    fn record(mut self, result: FileResult) -> Self {
        match result {
            FileResult::Formatted => self.formatted += 1,
            FileResult::Unchanged => self.unchanged += 1,
            FileResult::Skipped => self.skipped += 1,
            FileResult::Failed => self.failed += 1,
        }
        self
    }

    fn merge(mut self, other: Summary) -> Self {
        self.formatted += other.formatted;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self
    }
}

/// Format every file in `files` through one coordinator, in parallel
pub fn format_files(files: &[PathBuf], config: &Config) -> Summary {
    let coordinator = FormatCoordinator::new(CommandFormatter::from_config(config), FileSink::new())
        .with_staging(config.staging_area());

    files
        .par_iter()
        .map(|path| {
            let result = format_one(&coordinator, path);
            Summary::default().record(result)
        })
        .reduce(Summary::default, Summary::merge)
}

fn format_one(coordinator: &FormatCoordinator<CommandFormatter, FileSink>, path: &Path) -> FileResult {
    let original = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read {}: {e}", path.display());
            return FileResult::Failed;
        }
    };

    match coordinator.format(&path.to_string_lossy(), &original) {
        FormatOutcome::Committed => {
            let changed = fs::read_to_string(path).is_ok_and(|now| now != original);
            if changed {
                log::info!("Formatted {}", path.display());
                FileResult::Formatted
            } else {
                FileResult::Unchanged
            }
        }
        FormatOutcome::Stale | FormatOutcome::Rejected => FileResult::Skipped,
        FormatOutcome::Failed(_) => FileResult::Failed,
    }
}

/// Handle the format command: format the given paths once and exit.
pub fn handle_format(paths: &[String], config: &Config, quiet: bool) -> ! {
    let base = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("{}: Failed to get current directory: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    let files = find_files(paths, config, &base).unwrap_or_else(|e| {
        eprintln!("{}: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    if files.is_empty() {
        if !quiet {
            println!("No files to format");
        }
        exit::success();
    }

    let start = Instant::now();
    let summary = format_files(&files, config);
    let elapsed = start.elapsed();

    if !quiet {
        let mut parts = vec![format!("{} formatted", summary.formatted).green().to_string()];
        parts.push(format!("{} unchanged", summary.unchanged));
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped).yellow().to_string());
        }
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed).red().bold().to_string());
        }
        println!("{} in {}ms", parts.join(", "), elapsed.as_millis());
    }

    if summary.failed > 0 {
        exit::format_failed();
    }
    exit::success();
}
