//! Runner lookup, preparation and bounded execution in one call

use crate::{
    engine, ExecutionLimits, ExecutionResult, Result, RunnerRegistry, SandboxPolicy, Settings,
};

/// Resolves runner ids and executes snippets.
///
/// Holds no mutable state; one instance serves any number of concurrent
/// callers, each on its own thread.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: RunnerRegistry,
    policy: SandboxPolicy,
    limits: ExecutionLimits,
}

impl Executor {
    #[must_use]
    pub const fn new(
        registry: RunnerRegistry,
        policy: SandboxPolicy,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            registry,
            policy,
            limits,
        }
    }

    /// The standard runner table under the given settings.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.limits.validate()?;
        Ok(Self::new(
            RunnerRegistry::standard()?,
            settings.sandbox,
            settings.limits,
        ))
    }

    #[must_use]
    pub const fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// Run `code` with the runner registered as `runner_id`.
    ///
    /// Fails only for an unknown runner or when the command cannot be
    /// spawned; whatever the program itself does ends up in the result.
    pub fn execute(&self, code: &str, runner_id: &str) -> Result<ExecutionResult> {
        let runner = self.registry.lookup(runner_id)?;
        tracing::debug!(
            runner = runner_id,
            kind = runner.kind(),
            code_len = code.len(),
            "executing"
        );

        // Keep the prepared command alive until the child is reaped so a
        // type checker's scratch file outlives its reader.
        let prepared = runner.prepare(code, &self.policy)?;
        let raw = engine::execute(&prepared.invocation, &self.limits)?;
        drop(prepared);

        let result = runner.normalize(raw);
        tracing::info!(
            runner = runner_id,
            exit_code = result.exit_code,
            truncated = result.truncated,
            timed_out = result.timed_out,
            duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "execution completed"
        );
        Ok(result)
    }
}
