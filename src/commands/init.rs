//! Handler for the `init` command.

use colored::*;
use std::path::Path;

use savefmt_lib::config::{ConfigError, create_default_config};
use savefmt_lib::exit_codes::exit;

const DEFAULT_CONFIG_FILE: &str = ".savefmt.toml";

/// Write a commented default configuration into the current directory.
pub fn handle_init() {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    match create_default_config(path) {
        Ok(()) => {
            println!("Created default configuration file: {DEFAULT_CONFIG_FILE}");
        }
        Err(ConfigError::FileExists { path }) => {
            eprintln!(
                "{}: Configuration file {} already exists",
                "Error".red().bold(),
                path
            );
            exit::tool_error();
        }
        Err(e) => {
            eprintln!("{}: Failed to create config file: {}", "Error".red().bold(), e);
            exit::tool_error();
        }
    }
}
