//! LSP type definitions and utilities for savefmt

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::*;

/// Configuration for the savefmt LSP server, read from initialization options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SavefmtLspConfig {
    /// Path to savefmt configuration file
    pub config_path: Option<String>,
    /// Run the formatter whenever a document is saved
    pub format_on_save: bool,
}

impl Default for SavefmtLspConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            format_on_save: true,
        }
    }
}

/// Position just past the last character of `text`, in UTF-16 code units
pub fn end_position(text: &str) -> Position {
    let line = text.matches('\n').count() as u32;
    let last_line = text.rsplit('\n').next().unwrap_or_default();

    Position {
        line,
        character: last_line.encode_utf16().count() as u32,
    }
}

/// Edit replacing the whole of `old_text` in `uri`, valid only against
/// document `version`. A client holding a newer version refuses it.
pub fn full_document_edit(uri: &Url, version: i32, old_text: &str, new_text: &str) -> WorkspaceEdit {
    let edit = TextEdit {
        range: Range {
            start: Position { line: 0, character: 0 },
            end: end_position(old_text),
        },
        new_text: new_text.to_string(),
    };

    WorkspaceEdit {
        changes: None,
        document_changes: Some(DocumentChanges::Edits(vec![TextDocumentEdit {
            text_document: OptionalVersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version: Some(version),
            },
            edits: vec![OneOf::Left(edit)],
        }])),
        change_annotations: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SavefmtLspConfig::default();
        assert!(config.format_on_save);
        assert!(config.config_path.is_none());
    }

    #[test]
    fn test_config_from_initialization_options() {
        let options = serde_json::json!({ "configPath": "/p/.savefmt.toml" });
        let config: SavefmtLspConfig = serde_json::from_value(options).unwrap();

        assert_eq!(config.config_path.as_deref(), Some("/p/.savefmt.toml"));
        assert!(config.format_on_save, "missing keys fall back to defaults");

        let options = serde_json::json!({ "formatOnSave": false });
        let config: SavefmtLspConfig = serde_json::from_value(options).unwrap();
        assert!(!config.format_on_save);
    }

    #[test]
    fn test_end_position() {
        assert_eq!(end_position(""), Position { line: 0, character: 0 });
        assert_eq!(end_position("abc"), Position { line: 0, character: 3 });
        assert_eq!(end_position("abc\n"), Position { line: 1, character: 0 });
        assert_eq!(end_position("a\r\nbc"), Position { line: 1, character: 2 });
        // Astral characters take two UTF-16 units
        assert_eq!(end_position("x\n😀"), Position { line: 1, character: 2 });
    }

    #[test]
    fn test_full_document_edit() {
        let uri = Url::parse("file:///p/a.rs").unwrap();
        let edit = full_document_edit(&uri, 7, "fn main(){}\n", "fn main() {}\n");
        assert!(edit.changes.is_none());

        let Some(DocumentChanges::Edits(documents)) = edit.document_changes else {
            panic!("expected text document edits");
        };
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text_document.uri, uri);
        assert_eq!(documents[0].text_document.version, Some(7));

        let [OneOf::Left(text_edit)] = documents[0].edits.as_slice() else {
            panic!("expected a single plain text edit");
        };
        assert_eq!(text_edit.range.end, Position { line: 1, character: 0 });
        assert_eq!(text_edit.new_text, "fn main() {}\n");
    }
}
