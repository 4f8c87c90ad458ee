//! Exit codes for savefmt
//!
//! These exit codes allow users and CI/CD systems to distinguish between
//! different types of failures.

/// Success - Every file was formatted (or was already formatted)
pub const SUCCESS: i32 = 0;

/// Formatting failed for one or more files
pub const FORMAT_FAILED: i32 = 1;

/// Tool error - Configuration error, file access error, or internal error
pub const TOOL_ERROR: i32 = 2;

/// Helper functions for consistent exit behavior
pub mod exit {
    use super::{FORMAT_FAILED, SUCCESS, TOOL_ERROR};

    /// Exit with success code (0)
    pub fn success() -> ! {
        std::process::exit(SUCCESS);
    }

    /// Exit with format failure code (1)
    pub fn format_failed() -> ! {
        std::process::exit(FORMAT_FAILED);
    }

    /// Exit with tool error code (2)
    pub fn tool_error() -> ! {
        std::process::exit(TOOL_ERROR);
    }
}
