//! Sandbox launcher invocation
//!
//! The launcher parses its own flags up to the `--` separator and treats
//! everything after it as the command to jail, so token order matters.

use crate::SandboxPolicy;
use std::ffi::OsString;

/// Separator between launcher flags and the jailed command
pub const SEPARATOR: &str = "--";

/// Build the full argv that runs `command` under `policy`.
///
/// Order: launcher, `-q`, `-C <config>`, overrides, `--`, command.
#[must_use]
pub fn build<S: AsRef<std::ffi::OsStr>>(policy: &SandboxPolicy, command: &[S]) -> Vec<OsString> {
    let mut argv = Vec::with_capacity(command.len() + policy.overrides.len() + 5);
    argv.push(policy.launcher.clone().into_os_string());

    if policy.quiet {
        argv.push("-q".into());
    }
    if let Some(config) = &policy.config {
        argv.push("-C".into());
        argv.push(config.clone().into_os_string());
    }
    argv.extend(policy.overrides.iter().map(OsString::from));

    argv.push(SEPARATOR.into());
    argv.extend(command.iter().map(|arg| arg.as_ref().to_os_string()));
    argv
}
