//! Pluggable back-ends for spawning one shard's process: local subprocess or
//! batch-cluster submission.
//!
//! Grounded on Design Notes §9 ("pluggable runners and splitters via duck
//! typing... model as an interface/trait with explicit
//! `spawn/wait/poll/kill/default-splits`").

pub mod batch;
pub mod local;

use std::path::PathBuf;

use crate::error::Result;

/// A shard's lifecycle state (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Exited(i32),
    Killed,
}

/// One shard ready to hand to a runner: a rewritten argv (file tokens
/// already replaced with shard-local basenames by the dispatcher) plus the
/// shard's workspace and stdio redirections.
pub struct ShardJob {
    pub index: usize,
    pub workspace: PathBuf,
    pub argv: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Basenames of this shard's own argv-bound Input files, for batch
    /// systems that must be told which files to transfer to the execute
    /// node (spec.md §4.7). Excludes any binding marked `no_transfer`.
    pub input_basenames: Vec<String>,
    /// Basenames of this shard's own argv-bound Output files, checked for
    /// smuggled directory components when a batch runner's file transfer is
    /// enabled (spec.md §4.7). Excludes any binding marked `no_transfer`.
    pub output_basenames: Vec<String>,
}

/// A handle to one running (or finished) shard.
pub trait ShardHandle: Send {
    /// Non-blocking status check.
    fn poll(&mut self) -> Result<JobState>;
    /// Blocks until the shard finishes.
    fn wait(&mut self) -> Result<JobState>;
    fn kill(&mut self) -> Result<()>;
    fn terminate(&mut self) -> Result<()>;
}

/// A pluggable back-end that turns a [`ShardJob`] into a running process
/// somewhere (this machine, or a batch cluster) and reports back its exit
/// code.
pub trait Runner: Send + Sync {
    fn spawn(&self, job: ShardJob) -> Result<Box<dyn ShardHandle>>;

    /// Suggested shard count when the caller supplies none.
    fn default_splits(&self) -> Result<usize>;
}
