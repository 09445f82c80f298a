//! The error taxonomy shared by every module: schema resolution, splitting,
//! the two runners, and the external-command helper.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while binding, splitting, dispatching, or
/// joining a parallel job.
///
/// Variants map directly onto the error taxonomy: `SchemaError`,
/// `SplitterError`, `EmptyInputError`, `TransferabilityError`, `RunnerError`,
/// and `ExternalCommandError`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The schema is internally inconsistent, or can't be resolved against
    /// the concrete argv.
    #[error("schema error: {0}")]
    Schema(String),

    /// A non-passthrough input has no splitter, or its shard count
    /// disagrees with an already-fixed shard count.
    #[error("splitter error: {0}")]
    Splitter(String),

    /// The first split produced zero shards.
    #[error("empty input: the first input stream contains no records")]
    EmptyInput,

    /// An output file has a directory component while the batch runner's
    /// file transfer is enabled.
    #[error("transferability error: {0}")]
    Transferability(String),

    /// The runner's underlying process or submission command failed.
    #[error("runner error: {0}")]
    Runner(String),

    /// A child process finished with a non-zero exit code while the caller
    /// requested `check: true`.
    #[error("command failed (exit {code:?}): {}", argv.join(" "))]
    ExternalCommand {
        argv: Vec<String>,
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// A path that was expected to exist, or to be writable, was not.
    #[error("path error: {path:?}: {message}")]
    Path { path: PathBuf, message: String },

    /// Wraps any I/O failure that doesn't carry more specific context.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A schema or inline-schema literal failed to parse as JSON.
    #[error("invalid schema definition: {0}")]
    SchemaSyntax(#[from] serde_json::Error),
}

impl Error {
    /// One-word identifier of the error kind, used by the driver shims for
    /// the single-line stderr message (spec §7 "User-visible behavior").
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Schema(_) => "SchemaError",
            Error::Splitter(_) => "SplitterError",
            Error::EmptyInput => "EmptyInputError",
            Error::Transferability(_) => "TransferabilityError",
            Error::Runner(_) => "RunnerError",
            Error::ExternalCommand { .. } => "ExternalCommandError",
            Error::Path { .. } => "PathError",
            Error::Io(_) => "IoError",
            Error::SchemaSyntax(_) => "SchemaError",
        }
    }
}
