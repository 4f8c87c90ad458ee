//! Handler for the `completions` command.

use clap::{CommandFactory, ValueEnum};
use clap_complete::{Shell, generate};
use colored::*;
use std::io::stdout;

use savefmt_lib::exit_codes::exit;

/// Names clap accepts for the `shell` argument, in clap's order.
fn shell_names() -> Vec<String> {
    Shell::value_variants()
        .iter()
        .filter_map(ValueEnum::to_possible_value)
        .map(|value| value.get_name().to_string())
        .collect()
}

/// Print a completion script for `shell`, or for the shell in `$SHELL`.
pub fn handle_completions(shell: Option<Shell>, list: bool) {
    if list {
        for name in shell_names() {
            println!("{name}");
        }
        return;
    }

    let Some(shell) = shell.or_else(Shell::from_env) else {
        eprintln!("{}: Could not detect a supported shell from $SHELL", "Error".red().bold());
        eprintln!("Run `savefmt completions <SHELL>` with one of: {}", shell_names().join(", "));
        exit::tool_error();
    };

    generate(shell, &mut crate::Cli::command(), "savefmt", &mut stdout());
}
