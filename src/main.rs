use clap::{Parser, Subcommand};
use colored::*;
use std::path::Path;

use savefmt_lib::config::Config;
use savefmt_lib::exit_codes::exit;

mod commands;
mod discovery;
mod watch;

#[cfg(all(not(target_env = "msvc"), not(target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(all(target_env = "msvc", not(target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(author, version, about = "Format files on save without ever committing a stale result", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, conflicts_with = "no_config")]
    config: Option<String>,

    /// Ignore all configuration files and use built-in defaults
    #[arg(long, global = true)]
    no_config: bool,

    /// Show detailed output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format files or directories once
    Format {
        /// Files or directories to format (defaults to the current directory)
        paths: Vec<String>,
    },
    /// Watch files or directories and format them each time they are saved
    Watch {
        /// Files or directories to watch (defaults to the current directory)
        paths: Vec<String>,
    },
    /// Start the Language Server Protocol server
    Server {
        /// TCP port to listen on (for debugging)
        #[arg(long)]
        port: Option<u16>,
        /// Use stdio for communication (default)
        #[arg(long)]
        stdio: bool,
    },
    /// Initialize a new configuration file
    Init,
    /// Generate or check the JSON schema for the configuration file
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (detected from $SHELL if omitted)
        #[arg(value_enum)]
        shell: Option<clap_complete::Shell>,
        /// List available shells
        #[arg(long)]
        list: bool,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SchemaAction {
    /// Print the schema to stdout
    Print,
    /// Write the schema file next to the project's Cargo.toml
    Generate,
    /// Check that the schema file is up-to-date
    Check,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("savefmt={level},savefmt_lib={level}")),
    )
    .init();
}

/// Load configuration for the CLI, exiting with a tool error when it is unusable
pub(crate) fn load_config(config_path: Option<&str>, no_config: bool) -> Config {
    if no_config {
        return Config::default();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("{}: Failed to get current directory: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    match Config::load_with_discovery(config_path.map(Path::new), &cwd) {
        Ok((config, source)) => {
            if let Some(source) = source {
                log::debug!("Using configuration from {}", source.display());
            }
            config
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            exit::tool_error();
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Format { paths } => {
            let config = load_config(cli.config.as_deref(), cli.no_config);
            commands::format::handle_format(&paths, &config, cli.quiet);
        }
        Commands::Watch { paths } => {
            watch::run_watch_mode(&paths, cli.config.as_deref(), cli.no_config, cli.quiet);
        }
        Commands::Server { port, stdio: _ } => {
            commands::server::handle_server(port, cli.config);
        }
        Commands::Init => commands::init::handle_init(),
        Commands::Schema { action } => commands::schema::handle_schema(action),
        Commands::Completions { shell, list } => commands::completions::handle_completions(shell, list),
    }
}
