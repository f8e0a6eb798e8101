//! Error types for pyexpl-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PyexplError {
    #[error(
        "unsupported runner `{runner}`. supported runners are\n - {}",
        .supported.join("\n - ")
    )]
    UnknownRunner {
        runner: String,
        supported: Vec<String>,
    },

    #[error("runner `{0}` is registered twice")]
    DuplicateRunner(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
