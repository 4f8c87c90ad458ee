//! Handler for the `schema` command.

use colored::*;
use std::fs;
use std::path::PathBuf;

use savefmt_lib::config::Config;
use savefmt_lib::exit_codes::exit;

use crate::SchemaAction;

const SCHEMA_FILE: &str = "savefmt.schema.json";

/// JSON Schema for the configuration file, pretty-printed
pub fn schema_json() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(Config);
    serde_json::to_string_pretty(&schema)
}

/// Handle the schema subcommand (print, generate, or check).
pub fn handle_schema(action: SchemaAction) {
    let schema_json = schema_json().unwrap_or_else(|e| {
        eprintln!("{}: Failed to serialize schema: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    match action {
        SchemaAction::Print => {
            println!("{schema_json}");
        }
        SchemaAction::Generate => {
            let schema_path = get_project_schema_path();
            let existing_schema = fs::read_to_string(&schema_path).ok();

            if existing_schema.as_ref() == Some(&schema_json) {
                println!("Schema is already up-to-date: {}", schema_path.display());
            } else {
                fs::write(&schema_path, &schema_json).unwrap_or_else(|e| {
                    eprintln!("{}: Failed to write schema file: {}", "Error".red().bold(), e);
                    exit::tool_error();
                });
                println!("Schema updated: {}", schema_path.display());
            }
        }
        SchemaAction::Check => {
            let schema_path = get_project_schema_path();
            let existing_schema = fs::read_to_string(&schema_path).unwrap_or_else(|_| {
                eprintln!("Error: Schema file not found: {}", schema_path.display());
                eprintln!("Run 'savefmt schema generate' to create it.");
                exit::tool_error();
            });

            if existing_schema != schema_json {
                eprintln!("Error: Schema is out of date: {}", schema_path.display());
                eprintln!("Run 'savefmt schema generate' to update it.");
                exit::tool_error();
            }
            println!("Schema is up-to-date: {}", schema_path.display());
        }
    }
}

/// The schema lives next to the nearest Cargo.toml, or in the current directory
fn get_project_schema_path() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("{}: Failed to get current directory: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    cwd.ancestors()
        .find(|dir| dir.join("Cargo.toml").exists())
        .unwrap_or(&cwd)
        .join(SCHEMA_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_file_key_names() {
        let schema: serde_json::Value = serde_json::from_str(&schema_json().unwrap()).unwrap();
        let properties = schema["properties"].as_object().unwrap();

        for key in ["timeout", "staging-dir", "exclude", "respect-gitignore", "formatter", "formatters"] {
            assert!(properties.contains_key(key), "missing {key}");
        }
    }
}
