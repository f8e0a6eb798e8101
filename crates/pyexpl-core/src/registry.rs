//! Runner registry
//!
//! Built once at startup and never mutated afterwards, so it can be shared
//! between request handlers behind a plain `Arc`.

use crate::engine::StreamMode;
use crate::runner::{FileTool, Interpreter, Runner, Tool};
use crate::{PyexplError, Result};
use std::collections::HashMap;

/// Python versions served by the standard registry, newest first
pub const PYTHON_VERSIONS: &[&str] = &["3.14", "3.13", "3.12", "3.11", "3.10", "3.9", "3.8"];

/// Immutable map from runner id to runner
#[derive(Debug, Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Runner>,
}

impl RunnerRegistry {
    /// Create a new registry builder
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The interpreters and tools this service ships with
    pub fn standard() -> Result<Self> {
        let mut builder = Self::builder();
        for version in PYTHON_VERSIONS {
            builder = builder.register(
                format!("python{version}"),
                Runner::Interpreter(Interpreter::python(version)),
            )?;
        }

        builder
            .register(
                "mypy",
                Runner::TypeChecker(FileTool::new(
                    Tool::new([
                        "/home/tools/mypy/bin/python",
                        "/home/tools/mypy/bin/mypy",
                        "{file}",
                    ])
                    .overrides(["--cgroup_cpu_ms_per_sec", "0"])
                    .streams(StreamMode::Separate)
                    .findings([1]),
                )),
            )?
            .register(
                "ruff-format",
                Runner::Formatter(
                    Tool::new(["/usr/bin/env", "ruff", "format", "-"]).findings([2]),
                ),
            )?
            .register(
                "ruff-check",
                Runner::Linter(
                    Tool::new(["/usr/bin/env", "ruff", "check", "-"]).findings([1]),
                ),
            )?
            .register(
                "pyright",
                Runner::TypeChecker(FileTool::new(
                    Tool::new(["/usr/bin/env", "pyright", "{file}"])
                        .streams(StreamMode::Separate)
                        .findings([1]),
                )),
            )?
            // pytype misbehaves under the CPU and memory cgroups and opens
            // many files at once.
            .register(
                "pytype",
                Runner::TypeChecker(FileTool::new(
                    Tool::new(["/usr/bin/env", "pytype-single", "{file}"])
                        .overrides([
                            "--cgroup_mem_max",
                            "0",
                            "--cgroup_cpu_ms_per_sec",
                            "0",
                            "--rlimit_nofile",
                            "1000",
                        ])
                        .findings([1]),
                )),
            )?
            // pyre maps about 9GB of NORESERVE memory on startup.
            .register(
                "pyre",
                Runner::TypeChecker(FileTool::new(
                    Tool::new([
                        "/usr/bin/env",
                        "pyre",
                        "--noninteractive",
                        "--source-directory",
                        "{dir}",
                        "check",
                    ])
                    .overrides(["--rlimit_as", "max"])
                    .streams(StreamMode::Separate)
                    .findings([1]),
                )),
            )
            .map(RegistryBuilder::build)
    }

    /// Resolve a runner id
    pub fn lookup(&self, id: &str) -> Result<&Runner> {
        self.runners
            .get(id)
            .ok_or_else(|| PyexplError::UnknownRunner {
                runner: id.to_string(),
                supported: self.ids().into_iter().map(String::from).collect(),
            })
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

/// Builder for `RunnerRegistry`
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    runners: HashMap<String, Runner>,
}

impl RegistryBuilder {
    /// Add a runner; an id may only be registered once.
    pub fn register(mut self, id: impl Into<String>, runner: Runner) -> Result<Self> {
        let id = id.into();
        if self.runners.contains_key(&id) {
            return Err(PyexplError::DuplicateRunner(id));
        }
        tracing::trace!(runner = %id, kind = runner.kind(), "registered runner");
        self.runners.insert(id, runner);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> RunnerRegistry {
        RunnerRegistry {
            runners: self.runners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::InputMode;

    #[test]
    fn standard_registry_has_every_tool() {
        let registry = RunnerRegistry::standard().unwrap();

        assert_eq!(registry.len(), PYTHON_VERSIONS.len() + 6);
        for id in ["mypy", "ruff-format", "ruff-check", "pyright", "pytype", "pyre"] {
            assert!(registry.lookup(id).is_ok(), "missing {id}");
        }
        assert!(matches!(
            registry.lookup("python3.8").unwrap(),
            Runner::Interpreter(i) if i.version() == "3.8"
        ));
    }

    #[test]
    fn type_checkers_use_temp_files() {
        let registry = RunnerRegistry::standard().unwrap();
        for id in ["mypy", "pyright", "pytype", "pyre"] {
            assert_eq!(registry.lookup(id).unwrap().input_mode(), InputMode::TempFile);
        }
        assert_eq!(
            registry.lookup("ruff-check").unwrap().input_mode(),
            InputMode::Stdin
        );
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = RunnerRegistry::standard().unwrap();
        let err = registry.lookup("unknwon").unwrap_err();
        assert!(matches!(
            err,
            PyexplError::UnknownRunner { ref runner, .. } if runner == "unknwon"
        ));
        assert!(err.to_string().contains("\n - python3.13\n"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let err = RunnerRegistry::builder()
            .register("py", Runner::Interpreter(Interpreter::python("3.13")))
            .unwrap()
            .register("py", Runner::Interpreter(Interpreter::python("3.12")))
            .unwrap_err();
        assert!(matches!(err, PyexplError::DuplicateRunner(id) if id == "py"));
    }

    #[test]
    fn ids_are_sorted() {
        let registry = RunnerRegistry::builder()
            .register("b", Runner::Linter(Tool::new(["b"])))
            .unwrap()
            .register("a", Runner::Linter(Tool::new(["a"])))
            .unwrap()
            .build();
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }
}
