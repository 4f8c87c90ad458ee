//! Committing formatter output to documents held by an LSP client.
//!
//! [`LspSink::apply`] runs under the token registry lock, so it cannot await a
//! round trip to the client. It updates the server's copy of the document and
//! queues a `workspace/applyEdit` on an unbounded channel; the server forwards
//! queued edits to the client in order. Each edit names the document version it
//! was computed against, so a client that has moved on refuses it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tower_lsp::lsp_types::{Url, WorkspaceEdit};

use crate::editor::EditorSink;
use crate::lsp::types::full_document_edit;

/// A document the client has open, as of its last reported version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    pub text: String,
    pub version: i32,
}

/// The documents the client currently has open.
pub type DocumentStore = Arc<Mutex<HashMap<Url, OpenDocument>>>;

pub fn lock_documents(documents: &DocumentStore) -> MutexGuard<'_, HashMap<Url, OpenDocument>> {
    documents.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LspSink {
    documents: DocumentStore,
    edits: UnboundedSender<WorkspaceEdit>,
}

impl LspSink {
    /// Sink over `documents`, plus the receiving end of its edit queue.
    pub fn new(documents: DocumentStore) -> (Self, UnboundedReceiver<WorkspaceEdit>) {
        let (edits, receiver) = unbounded_channel();
        (Self { documents, edits }, receiver)
    }
}

impl EditorSink for LspSink {
    fn apply(&self, resource_id: &str, content: &str) -> bool {
        let Ok(uri) = Url::from_file_path(resource_id) else {
            return false;
        };

        let mut documents = lock_documents(&self.documents);
        let Some(document) = documents.get_mut(&uri) else {
            return false;
        };

        if document.text == content {
            return true;
        }

        let edit = full_document_edit(&uri, document.version, &document.text, content);
        document.text = content.to_string();

        if self.edits.send(edit).is_err() {
            log::warn!("Edit queue closed; formatted result for {uri} not sent to the client");
        }
        true
    }
}
