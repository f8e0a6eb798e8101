//! Daemon configuration

use anyhow::Context;
use pyexpl_core::Settings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// Sandbox policy and execution limits
    #[serde(flatten)]
    pub settings: Settings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: pyexpl_core::config::default_socket_path(),
            settings: Settings::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid daemon configuration")?;
        config.settings.limits.validate()?;
        Ok(config)
    }

    /// Load from `path`, else from `$PYEXPL_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path
            .map(Path::to_path_buf)
            .or_else(pyexpl_core::config::default_config_path)
        else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_share_one_file() {
        let config = DaemonConfig::from_toml(
            r#"
            socket_path = "/tmp/pyexpl-test.sock"

            [sandbox]
            launcher = "/usr/bin/nsjail"
            quiet = false

            [limits]
            max_output_bytes = 4096
            timeout_ms = 30000
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/pyexpl-test.sock"));
        assert_eq!(config.settings.sandbox.launcher, PathBuf::from("/usr/bin/nsjail"));
        assert!(!config.settings.sandbox.quiet);
        assert_eq!(config.settings.limits.max_output_bytes, 4096);
        assert_eq!(config.settings.limits.timeout_ms, Some(30_000));
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(DaemonConfig::from_toml("[limits]\nmax_output_bytes = 0\n").is_err());
    }
}
