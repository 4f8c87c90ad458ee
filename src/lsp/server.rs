//! Main Language Server Protocol server implementation for savefmt
//!
//! The server mirrors the client's open documents and formats a document each
//! time the client reports it saved. Any change to a document after a save
//! supersedes formatting still in flight for it, so a slow formatter can never
//! overwrite text the user has typed since.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tower_lsp::jsonrpc::Result as JsonRpcResult;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::config::Config;
use crate::coordinator::FormatCoordinator;
use crate::formatter::CommandFormatter;
use crate::lsp::sink::{DocumentStore, LspSink, OpenDocument, lock_documents};
use crate::lsp::types::SavefmtLspConfig;
use crate::token_registry::TokenRegistry;

type LspCoordinator = FormatCoordinator<CommandFormatter, Arc<LspSink>>;

/// Main LSP server for savefmt
pub struct SavefmtLanguageServer {
    client: Client,
    /// Configuration for the LSP server
    config: Arc<RwLock<SavefmtLspConfig>>,
    /// Config file given on the command line; wins over initialization options
    cli_config_path: Option<String>,
    /// Document store for open files
    documents: DocumentStore,
    registry: Arc<TokenRegistry>,
    sink: Arc<LspSink>,
    /// Rebuilt whenever configuration is (re)loaded; shares `registry` and `sink`
    coordinator: Arc<RwLock<Arc<LspCoordinator>>>,
    /// Taken by `initialized`, which starts forwarding edits to the client
    pending_edits: Mutex<Option<UnboundedReceiver<WorkspaceEdit>>>,
}

impl SavefmtLanguageServer {
    pub fn new(client: Client, cli_config_path: Option<&str>) -> Self {
        let documents = DocumentStore::default();
        let (sink, edits) = LspSink::new(Arc::clone(&documents));
        let sink = Arc::new(sink);
        let registry = Arc::new(TokenRegistry::new());
        let coordinator = build_coordinator(&registry, &sink, &Config::default());

        Self {
            client,
            config: Arc::new(RwLock::new(SavefmtLspConfig::default())),
            cli_config_path: cli_config_path.map(str::to_string),
            documents,
            registry,
            sink,
            coordinator: Arc::new(RwLock::new(coordinator)),
            pending_edits: Mutex::new(Some(edits)),
        }
    }

    /// The server's copy of an open document
    pub fn document_text(&self, uri: &Url) -> Option<String> {
        lock_documents(&self.documents).get(uri).map(|document| document.text.clone())
    }

    /// Last version of an open document reported by the client
    pub fn document_version(&self, uri: &Url) -> Option<i32> {
        lock_documents(&self.documents).get(uri).map(|document| document.version)
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Load configuration, preferring the CLI path, then initialization options,
    /// then discovery from the workspace root.
    async fn load_config(&self, workspace_root: Option<PathBuf>) {
        let explicit = match &self.cli_config_path {
            Some(path) => Some(path.clone()),
            None => self.config.read().await.config_path.clone(),
        };

        let start_dir = workspace_root
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        match Config::load_with_discovery(explicit.as_deref().map(Path::new), &start_dir) {
            Ok((config, source)) => {
                if let Some(source) = source {
                    log::info!("Loaded savefmt config from: {}", source.display());
                }
                *self.coordinator.write().await = build_coordinator(&self.registry, &self.sink, &config);
            }
            Err(e) => {
                log::warn!("Failed to load config: {e}");
                self.client
                    .show_message(MessageType::WARNING, format!("savefmt: {e}"))
                    .await;
            }
        }
    }

    /// Invalidate any formatting still running for `uri`
    fn supersede(&self, uri: &Url) {
        if let Some(resource) = resource_id(uri) {
            let token = self.registry.acquire(&resource);
            log::trace!("{resource} changed; in-flight formats before v{} are stale", token.version());
        }
    }
}

fn build_coordinator(registry: &Arc<TokenRegistry>, sink: &Arc<LspSink>, config: &Config) -> Arc<LspCoordinator> {
    Arc::new(
        FormatCoordinator::with_registry(
            Arc::clone(registry),
            CommandFormatter::from_config(config),
            Arc::clone(sink),
        )
        .with_staging(config.staging_area()),
    )
}

/// Resource identifier for a document that lives on disk
fn resource_id(uri: &Url) -> Option<String> {
    uri.to_file_path()
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

#[tower_lsp::async_trait]
impl LanguageServer for SavefmtLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> JsonRpcResult<InitializeResult> {
        log::info!("Initializing savefmt Language Server");

        if let Some(options) = params.initialization_options {
            match serde_json::from_value::<SavefmtLspConfig>(options) {
                Ok(config) => *self.config.write().await = config,
                Err(e) => log::warn!("Ignoring invalid initialization options: {e}"),
            }
        }

        #[allow(deprecated)] // root_uri is deprecated in favour of workspace_folders
        let workspace_root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| &folder.uri)
            .or(params.root_uri.as_ref())
            .and_then(|uri| uri.to_file_path().ok());
        self.load_config(workspace_root).await;

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    will_save: None,
                    will_save_wait_until: None,
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(true),
                    })),
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "savefmt".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("savefmt Language Server initialized");

        let receiver = self
            .pending_edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut receiver) = receiver {
            let client = self.client.clone();
            tokio::spawn(async move {
                while let Some(edit) = receiver.recv().await {
                    match client.apply_edit(edit).await {
                        Ok(response) if !response.applied => log::warn!(
                            "Client rejected formatting edit: {}",
                            response.failure_reason.unwrap_or_default()
                        ),
                        Ok(_) => {}
                        Err(e) => log::warn!("Failed to send formatting edit: {e}"),
                    }
                }
            });
        }

        self.client
            .log_message(MessageType::INFO, "savefmt Language Server started")
            .await;
    }

    async fn shutdown(&self) -> JsonRpcResult<()> {
        log::info!("Shutting down savefmt Language Server");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        lock_documents(&self.documents).insert(
            document.uri,
            OpenDocument {
                text: document.text,
                version: document.version,
            },
        );
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // FULL sync: the last change carries the whole document
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };

        // The echo of our own applied edit carries exactly the text we stored
        let changed = {
            let mut documents = lock_documents(&self.documents);
            let changed = documents.get(&uri).is_none_or(|document| document.text != change.text);
            documents.insert(
                uri.clone(),
                OpenDocument {
                    text: change.text,
                    version,
                },
            );
            changed
        };
        if changed {
            self.supersede(&uri);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;

        if let Some(text) = params.text
            && let Some(stored) = lock_documents(&self.documents).get_mut(&uri)
        {
            stored.text = text;
        }

        if !self.config.read().await.format_on_save {
            return;
        }

        let Some(resource) = resource_id(&uri) else {
            log::debug!("Not formatting {uri}: not a file on disk");
            return;
        };

        let text = self.document_text(&uri);
        let Some(text) = text else {
            log::debug!("Not formatting {uri}: document is not open");
            return;
        };

        let coordinator = Arc::clone(&*self.coordinator.read().await);

        // Acquire here so versions follow save order even though the work runs elsewhere
        let token = coordinator.registry().acquire(&resource);
        tokio::task::spawn_blocking(move || {
            coordinator.format_acquired(token, &text);
        });
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        lock_documents(&self.documents).remove(&uri);
        self.supersede(&uri);
    }
}
