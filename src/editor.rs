//! Destinations for committed formatter output.
//!
//! An [`EditorSink`] receives formatted text only after the token registry has
//! confirmed the attempt is still current, and it runs while the registry lock
//! is held. Implementations must therefore be quick and must never call back
//! into the registry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::token_registry::Token;

/// Applies formatted content to the live document for `resource_id`.
pub trait EditorSink: Send + Sync {
    /// Replace the document text, or return `false` without touching anything if
    /// the current document context is not `resource_id`.
    fn apply(&self, resource_id: &str, content: &str) -> bool;

    /// An attempt for `token` is about to format `base`. Called before staging,
    /// without the registry lock.
    fn attempt_started(&self, _token: &Token, _base: &str) {}
}

impl<T: EditorSink + ?Sized> EditorSink for Arc<T> {
    fn apply(&self, resource_id: &str, content: &str) -> bool {
        (**self).apply(resource_id, content)
    }

    fn attempt_started(&self, token: &Token, base: &str) {
        (**self).attempt_started(token, base)
    }
}

/// A folded line range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRange {
    pub start_line: usize,
    pub end_line: usize,
}

impl FoldRange {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self { start_line, end_line }
    }
}

/// Caret, scroll and fold state of a view onto a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Caret position as a character offset.
    pub caret: usize,
    /// First visible line.
    pub scroll_top: usize,
    /// First visible column.
    pub scroll_left: usize,
    pub folds: Vec<FoldRange>,
}

impl ViewState {
    /// This state adjusted so every position is valid in `text`.
    ///
    /// The caret and scroll offsets are clamped; folds that no longer fit are dropped.
    pub fn clamped_to(&self, text: &str) -> ViewState {
        let char_count = text.chars().count();
        let line_count = text.lines().count().max(1);

        ViewState {
            caret: self.caret.min(char_count),
            scroll_top: self.scroll_top.min(line_count - 1),
            scroll_left: self.scroll_left,
            folds: self
                .folds
                .iter()
                .copied()
                .filter(|fold| fold.start_line < fold.end_line && fold.end_line < line_count)
                .collect(),
        }
    }
}

/// An open document: its text plus the view onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    resource_id: String,
    text: String,
    view: ViewState,
}

impl Document {
    pub fn new(resource_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            text: text.into(),
            view: ViewState::default(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn set_view(&mut self, view: ViewState) {
        self.view = view.clamped_to(&self.text);
    }

    /// Swap in `content`, keeping the caret, scroll offsets and folds.
    pub fn replace_text(&mut self, content: &str) {
        let saved = self.view.clone();
        self.text = content.to_string();
        self.view = saved.clamped_to(&self.text);
    }
}

#[derive(Debug, Default)]
struct EditorState {
    documents: HashMap<String, Document>,
    active: Option<String>,
}

/// In-memory editor: a set of open documents, one of which is active.
///
/// Only the active document accepts formatted output; a result arriving for a
/// document the user has switched away from is rejected.
#[derive(Debug, Default)]
pub struct Editor {
    state: Mutex<EditorState>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a document and make it active.
    pub fn open(&self, resource_id: &str, text: &str) {
        let mut state = self.lock();
        state
            .documents
            .insert(resource_id.to_string(), Document::new(resource_id, text));
        state.active = Some(resource_id.to_string());
    }

    /// Make an already open document active. Returns whether it was open.
    pub fn activate(&self, resource_id: &str) -> bool {
        let mut state = self.lock();
        if !state.documents.contains_key(resource_id) {
            return false;
        }
        state.active = Some(resource_id.to_string());
        true
    }

    pub fn close(&self, resource_id: &str) {
        let mut state = self.lock();
        state.documents.remove(resource_id);
        if state.active.as_deref() == Some(resource_id) {
            state.active = None;
        }
    }

    /// Overwrite the text as a user edit would (no view preservation).
    pub fn edit(&self, resource_id: &str, text: &str) -> bool {
        match self.lock().documents.get_mut(resource_id) {
            Some(document) => {
                document.text = text.to_string();
                document.view = document.view.clamped_to(text);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Option<String> {
        self.lock().active.clone()
    }

    pub fn text(&self, resource_id: &str) -> Option<String> {
        self.lock().documents.get(resource_id).map(|doc| doc.text.clone())
    }

    pub fn view(&self, resource_id: &str) -> Option<ViewState> {
        self.lock().documents.get(resource_id).map(|doc| doc.view.clone())
    }

    pub fn set_view(&self, resource_id: &str, view: ViewState) -> bool {
        match self.lock().documents.get_mut(resource_id) {
            Some(document) => {
                document.set_view(view);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EditorSink for Editor {
    fn apply(&self, resource_id: &str, content: &str) -> bool {
        let mut state = self.lock();
        if state.active.as_deref() != Some(resource_id) {
            return false;
        }

        match state.documents.get_mut(resource_id) {
            Some(document) => {
                document.replace_text(content);
                true
            }
            None => false,
        }
    }
}

/// Writes committed output straight back to the file named by the resource.
///
/// Remembers a hash of the last content it wrote per path so a file watcher can
/// tell its own write-backs apart from user saves. It also remembers what the
/// newest attempt per path started from, and refuses to overwrite a file whose
/// content has moved on since then.
#[derive(Debug, Default)]
pub struct FileSink {
    written: Mutex<HashMap<PathBuf, blake3::Hash>>,
    /// Newest attempt version per path and the hash of the text it formats
    bases: Mutex<HashMap<PathBuf, (u64, blake3::Hash)>>,
}

impl FileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `content` at `path` is exactly what this sink last wrote there.
    pub fn is_own_write(&self, path: &Path, content: &str) -> bool {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .is_some_and(|hash| *hash == blake3::hash(content.as_bytes()))
    }
}

impl EditorSink for FileSink {
    fn apply(&self, resource_id: &str, content: &str) -> bool {
        let path = Path::new(resource_id);
        if !path.is_file() {
            return false;
        }

        let hash = blake3::hash(content.as_bytes());
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);

        let on_disk = match fs::read(path) {
            Ok(current) => blake3::hash(&current),
            Err(e) => {
                log::warn!("Failed to read {} before writing formatted output: {e}", path.display());
                return false;
            }
        };

        // Skip no-op writes so watchers don't see a spurious modification
        if on_disk == hash {
            written.insert(path.to_path_buf(), hash);
            return true;
        }

        // A save the registry has not seen yet; never write over it
        if let Some((version, base)) = self.bases.lock().unwrap_or_else(PoisonError::into_inner).get(path)
            && *base != on_disk
        {
            log::debug!("{} changed on disk after v{version} started formatting", path.display());
            return false;
        }

        match fs::write(path, content) {
            Ok(()) => {
                written.insert(path.to_path_buf(), hash);
                true
            }
            Err(e) => {
                log::error!("Failed to write formatted output to {}: {e}", path.display());
                false
            }
        }
    }

    fn attempt_started(&self, token: &Token, base: &str) {
        let hash = blake3::hash(base.as_bytes());
        let mut bases = self.bases.lock().unwrap_or_else(PoisonError::into_inner);

        // Workers may start out of order; the newest version's base wins
        let entry = bases
            .entry(PathBuf::from(token.resource_id()))
            .or_insert((token.version(), hash));
        if token.version() >= entry.0 {
            *entry = (token.version(), hash);
        }
    }
}
