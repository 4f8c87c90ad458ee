//! Command handlers for the savefmt CLI.
//!
//! Each subcommand has its own module with a public handler function
//! that `main()` dispatches to.

pub mod completions;
pub mod format;
pub mod init;
pub mod schema;
pub mod server;
