//! Language Server Protocol implementation for savefmt
//!
//! Formats documents on save inside any LSP-capable editor. Started with
//! `savefmt server`.

pub mod server;
pub mod sink;
pub mod types;

pub use server::SavefmtLanguageServer;
pub use sink::LspSink;
pub use types::SavefmtLspConfig;

use anyhow::Result;
use tokio::net::TcpListener;
use tower_lsp::{LspService, Server};

/// Start the Language Server Protocol server
/// This is the main entry point for `savefmt server`
pub async fn start_server(config_path: Option<&str>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| SavefmtLanguageServer::new(client, config_path));

    log::info!("Starting savefmt Language Server Protocol server");

    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

/// Start the LSP server over TCP (useful for debugging)
pub async fn start_tcp_server(port: u16, config_path: Option<&str>) -> Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    log::info!("savefmt LSP server listening on 127.0.0.1:{port}");

    loop {
        let (stream, _) = listener.accept().await?;
        let (service, socket) = LspService::new(|client| SavefmtLanguageServer::new(client, config_path));

        tokio::spawn(async move {
            let (read, write) = tokio::io::split(stream);
            Server::new(read, write, socket).serve(service).await;
        });
    }
}
