//! Sandbox policy and execution limits

use crate::{PyexplError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the sandbox launcher is invoked around every runner command.
///
/// Runners derive a per-invocation copy with [`SandboxPolicy::with_overrides`];
/// the shared value is never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Launcher binary (nsjail-compatible)
    pub launcher: PathBuf,

    /// Pass `-q` to the launcher
    pub quiet: bool,

    /// Launcher config file, passed with `-C`
    pub config: Option<PathBuf>,

    /// Extra launcher flags, in order
    pub overrides: Vec<String>,

    /// Mount point inside the jail for per-invocation scratch directories.
    ///
    /// When unset, file-based runners reference the host path directly.
    pub workspace: Option<PathBuf>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            launcher: PathBuf::from("nsjail"),
            quiet: true,
            config: Some(PathBuf::from("/app/nsjail.cfg")),
            overrides: Vec::new(),
            workspace: Some(PathBuf::from("/workspace")),
        }
    }
}

impl SandboxPolicy {
    /// Create a new policy builder
    #[must_use]
    pub fn builder() -> SandboxPolicyBuilder {
        SandboxPolicyBuilder::default()
    }

    /// A copy of this policy with `extra` flags appended after the existing overrides.
    #[must_use]
    pub fn with_overrides<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(extra.into_iter().map(Into::into));
        self
    }
}

/// Builder for `SandboxPolicy`
#[derive(Debug, Default)]
pub struct SandboxPolicyBuilder {
    policy: SandboxPolicy,
}

impl SandboxPolicyBuilder {
    #[must_use]
    pub fn launcher(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy.launcher = path.into();
        self
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.policy.quiet = quiet;
        self
    }

    #[must_use]
    pub fn config(mut self, path: Option<PathBuf>) -> Self {
        self.policy.config = path;
        self
    }

    #[must_use]
    pub fn override_flag(mut self, flag: impl Into<String>) -> Self {
        self.policy.overrides.push(flag.into());
        self
    }

    #[must_use]
    pub fn workspace(mut self, path: Option<PathBuf>) -> Self {
        self.policy.workspace = path;
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxPolicy {
        self.policy
    }
}

/// Bounds applied by the execution engine to every subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Output ceiling per stream in bytes
    pub max_output_bytes: usize,

    /// Largest single read from an output pipe
    pub chunk_size: usize,

    /// Poll timeout between liveness checks
    pub poll_interval_ms: u64,

    /// Time allowed between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,

    /// Optional wall-clock limit; disabled when unset
    pub timeout_ms: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 10_000,
            chunk_size: 100,
            poll_interval_ms: 20,
            kill_grace_ms: 500,
            timeout_ms: None,
        }
    }
}

impl ExecutionLimits {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Reject limits the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PyexplError::Config("chunk_size must be positive".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(PyexplError::Config(
                "max_output_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Everything an [`Executor`](crate::Executor) needs besides the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sandbox: SandboxPolicy,
    pub limits: ExecutionLimits,
}

impl Settings {
    /// Parse settings from TOML text; missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| PyexplError::Config(e.to_string()))?;
        settings.limits.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PyexplError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Load from `path`, else from `$PYEXPL_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }
}

/// Get config file path from `PYEXPL_CONFIG`, if set
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("PYEXPL_CONFIG").map(PathBuf::from)
}

/// Get default socket path from `PYEXPL_SOCKET` env var or system default
///
/// Returns:
/// - `$PYEXPL_SOCKET` if set (for development)
/// - `/run/pyexpl/pyexpl.sock` otherwise (production)
pub fn default_socket_path() -> PathBuf {
    std::env::var("PYEXPL_SOCKET")
        .map_or_else(|_| PathBuf::from("/run/pyexpl/pyexpl.sock"), PathBuf::from)
}
