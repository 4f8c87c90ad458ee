//! Watch mode: treat every save on disk as a format request

use chrono::Local;
use colored::*;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use savefmt_lib::config::{CONFIG_FILES, Config};
use savefmt_lib::exit_codes::exit;
use savefmt_lib::staging::is_staged_path;
use savefmt_lib::{CommandFormatter, FileSink, FormatCoordinator, FormatOutcome, TokenRegistry};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::discovery::FileFilter;

pub type WatchCoordinator = FormatCoordinator<CommandFormatter, Arc<FileSink>>;

#[derive(Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Configuration,
    SourceFile(Vec<PathBuf>),
}

/// Detects what kind of change occurred from the event's paths
pub fn change_detected(event: &Event) -> Option<ChangeKind> {
    let removal = matches!(event.kind, EventKind::Remove(_));
    if !removal && !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }

    let mut sources = Vec::new();
    for path in &event.paths {
        if is_config_file(path) {
            return Some(ChangeKind::Configuration);
        }
        if !removal && !is_staged_path(path) {
            sources.push(path.clone());
        }
    }

    if sources.is_empty() {
        None
    } else {
        Some(ChangeKind::SourceFile(sources))
    }
}

fn is_config_file(path: &Path) -> bool {
    CONFIG_FILES.iter().any(|name| {
        let name = Path::new(name);
        match name.parent() {
            // `.config/savefmt.toml`
            Some(parent) if !parent.as_os_str().is_empty() => path.ends_with(name),
            _ => path.file_name() == name.file_name(),
        }
    })
}

pub fn build_coordinator(registry: &Arc<TokenRegistry>, sink: &Arc<FileSink>, config: &Config) -> Arc<WatchCoordinator> {
    Arc::new(
        FormatCoordinator::with_registry(Arc::clone(registry), CommandFormatter::from_config(config), Arc::clone(sink))
            .with_staging(config.staging_area()),
    )
}

/// Start formatting `path` as a fresh save, unless the file on disk is exactly
/// what the coordinator's sink last wrote there.
///
/// The token is taken before the worker thread starts so versions follow the
/// order in which saves were observed.
pub fn handle_save(coordinator: &Arc<WatchCoordinator>, path: &Path) -> Option<JoinHandle<FormatOutcome>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::debug!("Skipping {}: {e}", path.display());
            return None;
        }
    };

    if coordinator.sink().is_own_write(path, &content) {
        log::trace!("Ignoring our own write to {}", path.display());
        return None;
    }

    let token = coordinator.registry().acquire(&path.to_string_lossy());
    let coordinator = Arc::clone(coordinator);
    let path = path.to_path_buf();

    Some(thread::spawn(move || {
        let outcome = coordinator.format_acquired(token, &content);
        report(&path, &outcome);
        outcome
    }))
}

fn report(path: &Path, outcome: &FormatOutcome) {
    let timestamp = Local::now().format("%H:%M:%S");
    let display = path.display();
    match outcome {
        FormatOutcome::Committed => println!("[{timestamp}] {} {display}", "Formatted".green().bold()),
        FormatOutcome::Stale => println!("[{timestamp}] {} {display} (superseded)", "Skipped".yellow()),
        FormatOutcome::Rejected => println!("[{timestamp}] {} {display} (file is gone)", "Skipped".yellow()),
        FormatOutcome::Failed(e) => eprintln!("[{timestamp}] {}: {e}", "Error".red().bold()),
    }
}

/// Watch `paths` and format files as they are saved. Never returns.
pub fn run_watch_mode(paths: &[String], config_path: Option<&str>, no_config: bool, quiet: bool) -> ! {
    let base = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("{}: Failed to get current directory: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    let mut config = crate::load_config(config_path, no_config);
    let registry = Arc::new(TokenRegistry::new());
    let sink = Arc::new(FileSink::new());
    let mut coordinator = build_coordinator(&registry, &sink, &config);

    let (tx, rx) = channel();
    let mut watcher = match RecommendedWatcher::new(
        tx,
        NotifyConfig::default().with_poll_interval(Duration::from_millis(500)),
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{}: Failed to create file watcher: {}", "Error".red().bold(), e);
            exit::tool_error();
        }
    };

    let watch_paths = if paths.is_empty() {
        vec![".".to_string()]
    } else {
        paths.to_vec()
    };

    for path_str in &watch_paths {
        if let Err(e) = watcher.watch(Path::new(path_str), RecursiveMode::Recursive) {
            eprintln!("{}: Failed to watch {}: {}", "Warning".yellow().bold(), path_str, e);
        }
    }

    if let Some(config_path) = config_path
        && let Err(e) = watcher.watch(Path::new(config_path), RecursiveMode::NonRecursive)
    {
        eprintln!("{}: Failed to watch config file: {}", "Warning".yellow().bold(), e);
    }

    if !quiet {
        let timestamp = Local::now().format("%H:%M:%S");
        println!("[{}] {}...", timestamp, "Watching for saves".green().bold());
        println!("{}", "Press Ctrl-C to exit".cyan());
    }

    let debounce_duration = Duration::from_millis(100);

    loop {
        let first_event = match rx.recv() {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                eprintln!("{}: Watch error: {}", "Error".red().bold(), e);
                continue;
            }
            Err(e) => {
                eprintln!("{}: Failed to receive watch event: {}", "Error".red().bold(), e);
                exit::tool_error();
            }
        };

        let mut reload = false;
        let mut saved = BTreeSet::new();
        let mut collect = |event: &Event| match change_detected(event) {
            Some(ChangeKind::Configuration) => reload = true,
            Some(ChangeKind::SourceFile(paths)) => saved.extend(paths),
            None => {}
        };

        // Coalesce the burst of events a single save tends to produce
        collect(&first_event);
        let start = Instant::now();
        while start.elapsed() < debounce_duration {
            if let Ok(Ok(event)) = rx.recv_timeout(Duration::from_millis(10)) {
                collect(&event);
            }
        }

        if reload {
            config = crate::load_config(config_path, no_config);
            coordinator = build_coordinator(&registry, &sink, &config);
            if !quiet {
                let timestamp = Local::now().format("%H:%M:%S");
                println!("[{}] {}", timestamp, "Configuration reloaded".yellow().bold());
            }
        }

        let filter = match FileFilter::new(&config, &base) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("{}: {}", "Error".red().bold(), e);
                continue;
            }
        };

        for path in saved.iter().filter(|path| filter.accepts(path)) {
            // Workers report their own outcome; nothing waits on them
            let _ = handle_save(&coordinator, path);
        }
    }
}
