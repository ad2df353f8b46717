use std::path::PathBuf;

use thiserror::Error;

pub type ShellResult<T> = Result<T, ShellError>;

/// Errors surfaced by the shell library.
///
/// `Exit` is not a failure: it carries the status requested by a script's
/// `exit` builtin and is translated into the task's exit code by
/// `ShellCore::run`.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid bytecode magic")]
    InvalidMagic,

    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),

    #[error("bytecode error: {0}")]
    Bytecode(String),

    #[error("assembly error at line {line}: {message}")]
    Assembly { line: usize, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script requested exit with status {0}")]
    Exit(i32),

    #[error("heap setup failed: {0}")]
    Heap(String),

    #[error("failed to spawn worker thread {id}: {source}")]
    Spawn { id: usize, source: std::io::Error },

    #[error("worker thread {id} panicked")]
    WorkerPanicked { id: usize },
}

impl ShellError {
    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        ShellError::Runtime(message.into())
    }
}
