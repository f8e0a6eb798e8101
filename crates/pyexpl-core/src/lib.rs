//! # pyexpl-core
//!
//! Bounded execution of untrusted code snippets under an external sandbox
//! launcher.
//!
//! This crate provides the orchestration pieces:
//! - `registry` - immutable map from runner id to runner
//! - `runner` - interpreter, formatter, linter and type-checker runners
//! - `sandbox` - argv construction for the sandbox launcher
//! - `engine` - spawn, drain output under a byte ceiling, terminate on breach
//! - `executor` - lookup, prepare, execute and exit-code normalization in one call

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pipe;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod runner;
pub mod sandbox;

pub use config::{ExecutionLimits, SandboxPolicy, Settings};
pub use error::PyexplError;
pub use executor::Executor;
pub use registry::RunnerRegistry;
pub use result::ExecutionResult;
pub use runner::Runner;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, PyexplError>;
