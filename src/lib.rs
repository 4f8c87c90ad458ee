//! Format-on-save that never lets a stale result overwrite a newer save.
//!
//! A save hands the buffer content to [`FormatCoordinator::format`], which takes
//! a [`Token`] from the [`TokenRegistry`], stages the content, runs the external
//! formatter and then commits through an [`EditorSink`] only if no newer save of
//! the same resource has been registered in the meantime.

pub mod config;
pub mod coordinator;
pub mod editor;
pub mod exit_codes;
pub mod formatter;
pub mod lsp;
pub mod staging;
pub mod token_registry;

pub use config::{Config, ConfigError, ToolDefinition, ToolTable};
pub use coordinator::{AttemptError, FormatCoordinator, FormatOutcome};
pub use editor::{Document, Editor, EditorSink, FileSink, FoldRange, ViewState};
pub use formatter::{CommandFormatter, ExitStatus, FormatterClient, FormatterError};
pub use staging::{StagedFile, StagingArea, StagingError, is_staged_path};
pub use token_registry::{Token, TokenRegistry};
