//! Running external formatters against staged files.
//!
//! The coordinator only needs [`FormatterClient`]: hand it a path, get back an
//! exit status. [`CommandFormatter`] is the process-backed implementation,
//! choosing a configured tool by the file's extension and enforcing a timeout.

use crate::config::{Config, ToolDefinition, ToolTable};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Exit status reported by a formatter run. Zero means success; any other
/// value is surfaced in diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn success(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        // Killed by a signal: no code to report
        Self(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error during formatter invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatterError {
    /// No formatter is configured for this kind of file.
    #[error("No formatter configured for '{path}'")]
    NoFormatter { path: String },

    /// Tool binary not found in PATH.
    #[error("Tool '{tool}' not found in PATH")]
    ToolNotFound { tool: String },

    /// Tool execution timed out.
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// I/O error while spawning or waiting on the tool.
    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Runs a formatter that rewrites `path` in place.
///
/// Called without any registry lock held, so it may block for as long as the
/// tool takes.
pub trait FormatterClient: Send + Sync {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError>;
}

impl<T: FormatterClient + ?Sized> FormatterClient for Arc<T> {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        (**self).run(path)
    }
}

/// Process-backed formatter driven by [`Config`].
///
/// Caches tool availability checks for efficiency.
pub struct CommandFormatter {
    tools: ToolTable,
    /// Cache of tool availability checks (tool name -> available).
    tool_cache: Arc<Mutex<HashMap<String, bool>>>,
    /// Timeout in milliseconds; zero waits forever.
    timeout_ms: u64,
}

impl CommandFormatter {
    pub fn new(default_tool: Option<ToolDefinition>, timeout_ms: u64) -> Self {
        Self::with_tools(
            ToolTable {
                default: default_tool,
                ..Default::default()
            },
            timeout_ms,
        )
    }

    pub fn with_tools(tools: ToolTable, timeout_ms: u64) -> Self {
        Self {
            tools,
            tool_cache: Arc::new(Mutex::new(HashMap::new())),
            timeout_ms,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_tools(config.tool_table(), config.timeout)
    }

    /// Register `tool` for files ending in `.{extension}`.
    pub fn with_tool(mut self, extension: &str, tool: ToolDefinition) -> Self {
        self.tools.by_extension.insert(extension.to_string(), tool);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Check if a tool is available (lazy, cached).
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        // Paths are checked directly rather than through PATH lookup
        if tool_name.contains(std::path::MAIN_SEPARATOR) {
            return Path::new(tool_name).is_file();
        }

        if let Some(&available) = self
            .tool_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
        {
            return available;
        }

        let available = check_tool_exists(tool_name);
        self.tool_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_name.to_string(), available);

        available
    }

    /// Run `tool` with `path` appended, waiting at most the configured timeout.
    pub fn execute(&self, tool: &ToolDefinition, path: &Path) -> Result<ToolOutput, FormatterError> {
        let Some(tool_name) = tool.program() else {
            return Err(FormatterError::NoFormatter {
                path: path.display().to_string(),
            });
        };

        if !self.is_tool_available(tool_name) {
            return Err(FormatterError::ToolNotFound {
                tool: tool_name.to_string(),
            });
        }

        let mut cmd = Command::new(tool_name);
        cmd.args(&tool.command[1..])
            .args(&tool.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("running {tool_name} on {}", path.display());

        let mut child = cmd.spawn().map_err(|e| FormatterError::IoError {
            message: format!("Failed to spawn '{tool_name}': {e}"),
        })?;

        // Drain pipes on their own threads so a chatty tool can't block on a full pipe
        let mut stdout_handle = child
            .stdout
            .take()
            .map(|stdout| thread::spawn(move || read_pipe_to_string(stdout)));
        let mut stderr_handle = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || read_pipe_to_string(stderr)));

        let timeout = Duration::from_millis(self.timeout_ms);
        let status = if timeout.is_zero() {
            child.wait().map_err(|e| FormatterError::IoError {
                message: format!("Failed to wait for '{tool_name}': {e}"),
            })?
        } else {
            let start = Instant::now();
            loop {
                if let Some(status) = child.try_wait().map_err(|e| FormatterError::IoError {
                    message: format!("Failed to poll '{tool_name}': {e}"),
                })? {
                    break status;
                }
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = join_reader(stdout_handle.take());
                    let _ = join_reader(stderr_handle.take());
                    return Err(FormatterError::Timeout {
                        tool: tool_name.to_string(),
                        timeout_ms: self.timeout_ms,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
        };

        let stdout = join_reader(stdout_handle.take()).map_err(|message| FormatterError::IoError { message })?;
        let stderr = join_reader(stderr_handle.take()).map_err(|message| FormatterError::IoError { message })?;

        Ok(ToolOutput {
            stdout,
            stderr,
            status: status.into(),
        })
    }
}

impl FormatterClient for CommandFormatter {
    fn run(&self, path: &Path) -> Result<ExitStatus, FormatterError> {
        let tool = self.tools.for_path(path).ok_or_else(|| FormatterError::NoFormatter {
            path: path.display().to_string(),
        })?;

        let output = self.execute(tool, path)?;
        if !output.status.success() {
            let stderr = output.stderr.trim();
            if !stderr.is_empty() {
                log::debug!("formatter stderr for {}: {stderr}", path.display());
            }
        }
        Ok(output.status)
    }
}

impl Default for CommandFormatter {
    fn default() -> Self {
        Self::new(None, 30_000) // 30 seconds default
    }
}

/// Captured result of one tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

/// Check if a tool binary exists.
fn check_tool_exists(tool_name: &str) -> bool {
    #[cfg(unix)]
    let locator = "which";
    #[cfg(windows)]
    let locator = "where";

    Command::new(locator)
        .arg(tool_name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn read_pipe_to_string<R: Read>(mut pipe: R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn join_reader(handle: Option<thread::JoinHandle<std::io::Result<String>>>) -> Result<String, String> {
    match handle {
        Some(handle) => match handle.join() {
            Ok(res) => res.map_err(|e| format!("Failed to read output: {e}")),
            Err(_) => Err("Output reader thread panicked".to_string()),
        },
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sh(script: &str) -> ToolDefinition {
        // With `sh -c`, the appended file path becomes $0
        ToolDefinition::new(["sh", "-c", script])
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::SUCCESS.success());
        assert!(!ExitStatus(1).success());
        assert_eq!(ExitStatus(3).code(), 3);
        assert_eq!(ExitStatus(-1).to_string(), "-1");
    }

    #[test]
    fn test_no_formatter_configured() {
        let formatter = CommandFormatter::default();
        let result = formatter.run(Path::new("/tmp/a.rs"));
        assert!(matches!(result, Err(FormatterError::NoFormatter { .. })));
    }

    #[test]
    fn test_tool_not_found() {
        let formatter = CommandFormatter::new(Some(ToolDefinition::new(["nonexistent-tool-xyz123"])), 1_000);
        let result = formatter.run(Path::new("/tmp/a.rs"));
        assert_eq!(
            result,
            Err(FormatterError::ToolNotFound {
                tool: "nonexistent-tool-xyz123".to_string()
            })
        );
    }

    #[test]
    fn test_empty_command() {
        let formatter = CommandFormatter::default();
        let result = formatter.execute(&ToolDefinition::default(), Path::new("/tmp/a.rs"));
        assert!(matches!(result, Err(FormatterError::NoFormatter { .. })));
    }

    #[test]
    fn test_extension_selects_tool() {
        let formatter = CommandFormatter::new(Some(ToolDefinition::new(["fallback"])), 0)
            .with_tool("rs", ToolDefinition::new(["rustfmt"]));

        assert_eq!(formatter.tools.for_path(Path::new("x.rs")).and_then(|t| t.program()), Some("rustfmt"));
        assert_eq!(formatter.tools.for_path(Path::new("x.py")).and_then(|t| t.program()), Some("fallback"));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config {
            timeout: 1234,
            ..Default::default()
        };
        config.formatters.insert("go".to_string(), ToolDefinition::new(["gofmt", "-w"]));

        let formatter = CommandFormatter::from_config(&config);
        assert_eq!(formatter.timeout_ms(), 1234);
        assert_eq!(formatter.tools.for_path(Path::new("main.go")).and_then(|t| t.program()), Some("gofmt"));
        assert!(formatter.tools.for_path(Path::new("main.rs")).is_none());
        assert_eq!(formatter.tools, config.tool_table());
    }

    #[test]
    #[cfg(unix)]
    fn test_rewrites_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        fs::write(&path, "hello\n").unwrap();

        let formatter = CommandFormatter::new(
            Some(sh(r#"tr '[:lower:]' '[:upper:]' < "$0" > "$0.out" && mv "$0.out" "$0""#)),
            10_000,
        );

        let status = formatter.run(&path).unwrap();
        assert!(status.success());
        assert_eq!(fs::read_to_string(&path).unwrap(), "HELLO\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_nonzero_exit_is_reported_not_errored() {
        let formatter = CommandFormatter::new(Some(sh("echo 'syntax error' >&2; exit 3")), 10_000);
        let status = formatter.run(Path::new("/tmp/whatever.txt")).unwrap();
        assert_eq!(status, ExitStatus(3));
    }

    #[test]
    #[cfg(unix)]
    fn test_output_is_captured() {
        let formatter = CommandFormatter::default();
        let output = formatter
            .execute(&sh(r#"echo "out $0"; echo err >&2"#), Path::new("/tmp/f.txt"))
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "out /tmp/f.txt");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout() {
        let formatter = CommandFormatter::new(Some(sh("exec sleep 5")), 50);
        let start = Instant::now();
        let result = formatter.run(Path::new("/tmp/x"));

        assert!(matches!(result, Err(FormatterError::Timeout { timeout_ms: 50, .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[cfg(unix)]
    fn test_availability_is_cached() {
        let formatter = CommandFormatter::default();
        assert!(formatter.is_tool_available("sh"));
        assert_eq!(
            formatter.tool_cache.lock().unwrap().get("sh").copied(),
            Some(true)
        );
    }
}
