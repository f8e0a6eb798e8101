//! Execution result types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Appended once to a stream that hit the output ceiling
pub const TRUNCATION_MARKER: &str = "\n[Output truncated]";

/// Exit status reported when a forcibly terminated process gives no code of its own
pub const TERMINATED_EXIT_CODE: i32 = 128 + nix::libc::SIGTERM;

/// Result of a sandboxed code execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the process, `128 + signal` for signal deaths
    pub exit_code: i32,

    /// Standard output (merged with stderr for combined runners)
    pub stdout: Vec<u8>,

    /// Standard error (empty for combined runners)
    pub stderr: Vec<u8>,

    /// Whether output hit the ceiling and was cut
    pub truncated: bool,

    /// Whether the process was killed due to the wall-clock limit
    pub timed_out: bool,

    /// Execution duration
    pub duration: Duration,
}

impl ExecutionResult {
    /// Get stdout as UTF-8 string, lossy conversion
    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Get stderr as UTF-8 string, lossy conversion
    #[must_use]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Check if execution was successful (exit code 0, not cut short)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.truncated && !self.timed_out
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            exit_code: -1,
            stdout: Vec::new(),
            stderr: Vec::new(),
            truncated: false,
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}
