//! Runners turn a code snippet into a jailed command line
//!
//! The variant set is closed: interpreters take the code inline, formatters
//! and linters read it from stdin, type checkers get a real file in a scratch
//! directory that lives exactly as long as the [`PreparedCommand`].

use crate::engine::{Invocation, StreamMode};
use crate::{sandbox, ExecutionResult, Result, SandboxPolicy};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Placeholder for the snippet's path in a type checker's command template
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Placeholder for the scratch directory in a type checker's command template
pub const DIR_PLACEHOLDER: &str = "{dir}";

/// How the snippet reaches the tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Passed as a program argument
    Inline,
    /// Written to the tool's stdin
    Stdin,
    /// Materialized as a file the tool is pointed at
    TempFile,
}

/// An interpreter for one language version, run as `<program> -c <code>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    version: String,
    program: Vec<String>,
    overrides: Vec<String>,
}

impl Interpreter {
    /// `python<version>` resolved through `/usr/bin/env` inside the jail
    #[must_use]
    pub fn python(version: &str) -> Self {
        Self::new(
            version,
            ["/usr/bin/env".to_string(), format!("python{version}")],
        )
    }

    pub fn new<I, S>(version: impl Into<String>, program: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            program: program.into_iter().map(Into::into).collect(),
            overrides: Vec::new(),
        }
    }

    /// Launcher flags appended after the policy's own overrides
    #[must_use]
    pub fn overrides<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(flags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// An external tool: command template, launcher overrides, capture mode and
/// the exit codes it uses to report findings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    command: Vec<String>,
    overrides: Vec<String>,
    streams: StreamMode,
    findings: Vec<i32>,
}

impl Tool {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            overrides: Vec::new(),
            streams: StreamMode::Combined,
            findings: Vec::new(),
        }
    }

    /// Launcher flags appended after the policy's own overrides
    #[must_use]
    pub fn overrides<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(flags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn streams(mut self, mode: StreamMode) -> Self {
        self.streams = mode;
        self
    }

    /// Exit codes that mean "the tool found problems" and map to 0
    #[must_use]
    pub fn findings(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.findings.extend(codes);
        self
    }
}

/// A tool that needs a path on disk rather than stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTool {
    tool: Tool,
    file_name: String,
}

impl FileTool {
    #[must_use]
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            file_name: "main.py".into(),
        }
    }

    #[must_use]
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }
}

/// A configured strategy for running one interpreter or tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runner {
    Interpreter(Interpreter),
    Formatter(Tool),
    Linter(Tool),
    TypeChecker(FileTool),
}

/// Everything needed to spawn one execution.
///
/// Holds the scratch directory of file-based runners; dropping this value
/// removes it, whichever way the execution ended.
#[derive(Debug)]
pub struct PreparedCommand {
    pub invocation: Invocation,
    scratch: Option<TempDir>,
}

impl PreparedCommand {
    /// Host path of the scratch directory, if this runner uses one
    #[must_use]
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

impl Runner {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Interpreter(_) => "interpreter",
            Self::Formatter(_) => "formatter",
            Self::Linter(_) => "linter",
            Self::TypeChecker(_) => "type-checker",
        }
    }

    #[must_use]
    pub const fn input_mode(&self) -> InputMode {
        match self {
            Self::Interpreter(_) => InputMode::Inline,
            Self::Formatter(_) | Self::Linter(_) => InputMode::Stdin,
            Self::TypeChecker(_) => InputMode::TempFile,
        }
    }

    #[must_use]
    pub const fn streams(&self) -> StreamMode {
        match self {
            Self::Interpreter(_) => StreamMode::Combined,
            Self::Formatter(tool) | Self::Linter(tool) => tool.streams,
            Self::TypeChecker(file_tool) => file_tool.tool.streams,
        }
    }

    /// Build the jailed command line for `code` under `policy`.
    pub fn prepare(&self, code: &str, policy: &SandboxPolicy) -> Result<PreparedCommand> {
        match self {
            Self::Interpreter(interpreter) => {
                let mut command = interpreter.program.clone();
                command.push("-c".into());
                command.push(code.into());

                let policy = policy.clone().with_overrides(&interpreter.overrides);
                Ok(PreparedCommand {
                    invocation: Invocation::new(sandbox::build(&policy, &command))
                        .streams(self.streams()),
                    scratch: None,
                })
            }
            Self::Formatter(tool) | Self::Linter(tool) => {
                let policy = policy.clone().with_overrides(&tool.overrides);
                Ok(PreparedCommand {
                    invocation: Invocation::new(sandbox::build(&policy, &tool.command))
                        .stdin(code)
                        .streams(tool.streams),
                    scratch: None,
                })
            }
            Self::TypeChecker(file_tool) => prepare_file_tool(file_tool, code, policy),
        }
    }

    /// Map tool-reported findings to a success status.
    ///
    /// Results cut short by the engine keep their status.
    #[must_use]
    pub fn normalize(&self, result: ExecutionResult) -> ExecutionResult {
        let findings = match self {
            Self::Interpreter(_) => return result,
            Self::Formatter(tool) | Self::Linter(tool) => &tool.findings,
            Self::TypeChecker(file_tool) => &file_tool.tool.findings,
        };
        if result.truncated || result.timed_out || !findings.contains(&result.exit_code) {
            return result;
        }
        tracing::debug!(
            runner = self.kind(),
            exit_code = result.exit_code,
            "tool reported findings"
        );
        ExecutionResult {
            exit_code: 0,
            ..result
        }
    }
}

fn prepare_file_tool(
    file_tool: &FileTool,
    code: &str,
    policy: &SandboxPolicy,
) -> Result<PreparedCommand> {
    let scratch = tempfile::Builder::new().prefix("pyexpl-").tempdir()?;
    let host_file = scratch.path().join(&file_tool.file_name);
    std::fs::write(&host_file, code)?;

    let mut policy = policy.clone().with_overrides(&file_tool.tool.overrides);
    let workspace = policy.workspace.clone();
    let (dir, file, current_dir): (PathBuf, PathBuf, Option<PathBuf>) = match workspace {
        Some(mount) => {
            let flags = [
                "--bindmount_ro".to_string(),
                format!("{}:{}", scratch.path().display(), mount.display()),
                "--cwd".to_string(),
                mount.display().to_string(),
            ];
            let file = mount.join(&file_tool.file_name);
            policy = policy.with_overrides(flags);
            (mount, file, None)
        }
        None => (
            scratch.path().to_path_buf(),
            host_file,
            Some(scratch.path().to_path_buf()),
        ),
    };

    let dir = dir.to_string_lossy();
    let file = file.to_string_lossy();
    let command: Vec<String> = file_tool
        .tool
        .command
        .iter()
        .map(|arg| {
            arg.replace(FILE_PLACEHOLDER, &file)
                .replace(DIR_PLACEHOLDER, &dir)
        })
        .collect();

    let mut invocation =
        Invocation::new(sandbox::build(&policy, &command)).streams(file_tool.tool.streams);
    invocation.current_dir = current_dir;

    Ok(PreparedCommand {
        invocation,
        scratch: Some(scratch),
    })
}
