//! Concurrent saves of the same resource: only the newest result may land.

use pretty_assertions::assert_eq;
use savefmt_lib::{
    Editor, EditorSink, ExitStatus, FileSink, FormatCoordinator, FormatOutcome, FormatterClient, FormatterError,
    StagingArea,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn io_error(e: std::io::Error) -> FormatterError {
    FormatterError::IoError { message: e.to_string() }
}

/// Uppercases the staged file. Content starting with "slow" blocks until
/// released, after announcing that it has started.
struct Gated {
    started: Mutex<Sender<String>>,
    release: Mutex<Receiver<()>>,
}

struct Gates {
    started: Receiver<String>,
    release: Sender<()>,
}

fn gated() -> (Gated, Gates) {
    let (started_tx, started_rx) = channel();
    let (release_tx, release_rx) = channel();
    (
        Gated {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        },
        Gates {
            started: started_rx,
            release: release_tx,
        },
    )
}

impl FormatterClient for Gated {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        let content = fs::read_to_string(path).map_err(io_error)?;
        if content.starts_with("slow") {
            self.started.lock().unwrap().send(content.clone()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        fs::write(path, content.to_uppercase()).map_err(io_error)?;
        Ok(ExitStatus::SUCCESS)
    }
}

struct Failing;

impl FormatterClient for Failing {
    fn run(&self, _path: &Path) -> Result<ExitStatus, FormatterError> {
        Ok(ExitStatus(2))
    }
}

struct Uppercase;

impl FormatterClient for Uppercase {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        let content = fs::read_to_string(path).map_err(io_error)?;
        fs::write(path, content.to_uppercase()).map_err(io_error)?;
        Ok(ExitStatus::SUCCESS)
    }
}

/// Records every apply it receives
#[derive(Default)]
struct Recording {
    applied: Mutex<Vec<(String, String)>>,
}

impl EditorSink for Recording {
    fn apply(&self, resource_id: &str, content: &str) -> bool {
        self.applied
            .lock()
            .unwrap()
            .push((resource_id.to_string(), content.to_string()));
        true
    }
}

fn staging_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn test_newer_save_wins_over_slow_older_save() {
    let staging = tempfile::tempdir().unwrap();
    let (formatter, gates) = gated();
    let editor = Arc::new(Editor::new());
    editor.open("doc.txt", "slow one");

    let coordinator = Arc::new(
        FormatCoordinator::new(formatter, Arc::clone(&editor))
            .with_staging(StagingArea::Directory(staging.path().to_path_buf())),
    );

    let first = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.format("doc.txt", "slow one"))
    };
    assert_eq!(gates.started.recv().unwrap(), "slow one");

    // The user types and saves again while the first run is still going
    editor.edit("doc.txt", "fast two");
    assert!(coordinator.format("doc.txt", "fast two").is_committed());
    assert_eq!(editor.text("doc.txt").unwrap(), "FAST TWO");

    gates.release.send(()).unwrap();
    assert!(matches!(first.join().unwrap(), FormatOutcome::Stale));

    assert_eq!(editor.text("doc.txt").unwrap(), "FAST TWO");
    assert!(staging_is_empty(staging.path()));
}

#[test]
fn test_sequential_saves_both_commit() {
    let staging = tempfile::tempdir().unwrap();
    let editor = Arc::new(Editor::new());
    editor.open("doc.txt", "one");

    let coordinator = FormatCoordinator::new(Uppercase, Arc::clone(&editor))
        .with_staging(StagingArea::Directory(staging.path().to_path_buf()));

    assert!(coordinator.format("doc.txt", "one").is_committed());
    assert_eq!(editor.text("doc.txt").unwrap(), "ONE");

    editor.edit("doc.txt", "two");
    assert!(coordinator.format("doc.txt", "two").is_committed());
    assert_eq!(editor.text("doc.txt").unwrap(), "TWO");
    assert_eq!(coordinator.registry().current_version("doc.txt"), Some(2));
}

#[test]
fn test_failed_format_leaves_document_untouched() {
    let staging = tempfile::tempdir().unwrap();
    let editor = Arc::new(Editor::new());
    editor.open("doc.txt", "unformatted");

    let coordinator = FormatCoordinator::new(Failing, Arc::clone(&editor))
        .with_staging(StagingArea::Directory(staging.path().to_path_buf()));

    let outcome = coordinator.format("doc.txt", "unformatted");
    assert!(outcome.is_failed());
    assert_eq!(editor.text("doc.txt").unwrap(), "unformatted");
    assert!(staging_is_empty(staging.path()));
}

#[test]
fn test_switching_documents_rejects_in_flight_result() {
    let staging = tempfile::tempdir().unwrap();
    let (formatter, gates) = gated();
    let editor = Arc::new(Editor::new());
    editor.open("a.txt", "slow a");

    let coordinator = Arc::new(
        FormatCoordinator::new(formatter, Arc::clone(&editor))
            .with_staging(StagingArea::Directory(staging.path().to_path_buf())),
    );

    let attempt = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.format("a.txt", "slow a"))
    };
    gates.started.recv().unwrap();

    editor.open("b.txt", "other");
    gates.release.send(()).unwrap();

    assert!(matches!(attempt.join().unwrap(), FormatOutcome::Rejected));
    assert_eq!(editor.text("a.txt").unwrap(), "slow a");
    assert_eq!(editor.text("b.txt").unwrap(), "other");
}

#[test]
fn test_resources_do_not_interfere() {
    let staging = tempfile::tempdir().unwrap();
    let (formatter, gates) = gated();
    let sink = Arc::new(Recording::default());

    let coordinator = Arc::new(
        FormatCoordinator::new(formatter, Arc::clone(&sink))
            .with_staging(StagingArea::Directory(staging.path().to_path_buf())),
    );

    let slow = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.format("a.txt", "slow a"))
    };
    gates.started.recv().unwrap();

    // Saving another file does not make the first one stale
    assert!(coordinator.format("b.txt", "b").is_committed());
    gates.release.send(()).unwrap();
    assert!(slow.join().unwrap().is_committed());

    let mut applied = sink.applied.lock().unwrap().clone();
    applied.sort();
    assert_eq!(
        applied,
        vec![
            ("a.txt".to_string(), "SLOW A".to_string()),
            ("b.txt".to_string(), "B".to_string())
        ]
    );
}

/// Formatter that takes a different amount of time per save so attempts
/// finish out of order
struct Jittery;

impl FormatterClient for Jittery {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        let content = fs::read_to_string(path).map_err(io_error)?;
        let delay = content.bytes().map(u64::from).sum::<u64>() % 7;
        thread::sleep(Duration::from_millis(delay));
        fs::write(path, content.to_uppercase()).map_err(io_error)?;
        Ok(ExitStatus::SUCCESS)
    }
}

#[test]
fn test_only_newest_of_many_concurrent_saves_commits() {
    let staging = tempfile::tempdir().unwrap();
    let sink = Arc::new(Recording::default());
    let coordinator = Arc::new(
        FormatCoordinator::new(Jittery, Arc::clone(&sink))
            .with_staging(StagingArea::Directory(staging.path().to_path_buf())),
    );

    // Every save is registered before any attempt can commit
    let saves: Vec<_> = (0..12)
        .map(|i| {
            let content = format!("save number {i}");
            (coordinator.registry().acquire("doc.txt"), content)
        })
        .collect();

    let handles: Vec<_> = saves
        .into_iter()
        .map(|(token, content)| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.format_acquired(token, &content))
        })
        .collect();

    let outcomes: Vec<FormatOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let committed = outcomes.iter().filter(|o| o.is_committed()).count();
    let stale = outcomes.iter().filter(|o| matches!(o, FormatOutcome::Stale)).count();

    assert_eq!(committed, 1);
    assert_eq!(stale, 11);
    assert!(outcomes[11].is_committed());
    assert_eq!(
        *sink.applied.lock().unwrap(),
        vec![("doc.txt".to_string(), "SAVE NUMBER 11".to_string())]
    );
    assert!(staging_is_empty(staging.path()));
}

/// Uppercases the staged file, but the user saves `target` again while it runs
struct SavedDuringRun {
    target: PathBuf,
    newer: &'static str,
}

impl FormatterClient for SavedDuringRun {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        fs::write(&self.target, self.newer).map_err(io_error)?;
        Uppercase.run(path)
    }
}

#[test]
fn test_file_saved_during_run_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let resource = path.to_str().unwrap();
    fs::write(&path, "first save\n").unwrap();

    let formatter = SavedDuringRun {
        target: path.clone(),
        newer: "user's newer save\n",
    };
    let coordinator = FormatCoordinator::new(formatter, FileSink::new())
        .with_staging(StagingArea::Directory(staging.path().to_path_buf()));

    // The newer save has not reached the registry yet, so v1 is still current
    let outcome = coordinator.format(resource, "first save\n");
    assert!(matches!(outcome, FormatOutcome::Rejected));
    assert_eq!(coordinator.registry().current_version(resource), Some(1));

    assert_eq!(fs::read_to_string(&path).unwrap(), "user's newer save\n");
    assert!(!coordinator.sink().is_own_write(&path, "FIRST SAVE\n"));
    assert!(staging_is_empty(staging.path()));

    // Once that save is registered it formats normally; the rewrite during the
    // run leaves the disk content equal to the base this time
    assert!(coordinator.format(resource, "user's newer save\n").is_committed());
    assert_eq!(coordinator.registry().current_version(resource), Some(2));
    assert_eq!(fs::read_to_string(&path).unwrap(), "USER'S NEWER SAVE\n");
}
