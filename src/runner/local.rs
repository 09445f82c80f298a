//! Spawns one subprocess per shard on this machine.
//!
//! Grounded on `original_source/psubprocess/prunner.py::_launch_jobs`. The
//! original `chdir`s the whole process into each shard's work dir before
//! spawning and restores the original cwd afterward, because Python's
//! `subprocess.Popen` has no per-child working directory parameter; this
//! crate uses `std::process::Command::current_dir` instead, so the
//! dispatcher's own working directory is never touched and there is nothing
//! to restore.

use std::fs::File;

use crate::error::{Error, Result};
use crate::process::{self, Redirection};
use crate::runner::{JobState, Runner, ShardHandle, ShardJob};

/// Runs shards as local child processes, up to `parallelism` worth of
/// default shard count when the caller asks for none.
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        LocalRunner
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner for LocalRunner {
    fn spawn(&self, job: ShardJob) -> Result<Box<dyn ShardHandle>> {
        let stdin = match &job.stdin {
            // Reopened read-only, even if the shard file was written to
            // moments earlier (spec.md §4.6).
            Some(path) => Redirection::File(File::open(path)?),
            None => Redirection::Inherit,
        };
        let stdout = match &job.stdout {
            Some(path) => Redirection::File(File::create(path)?),
            None => Redirection::Inherit,
        };
        let stderr = match &job.stderr {
            Some(path) => Redirection::File(File::create(path)?),
            None => Redirection::Inherit,
        };

        tracing::info!(shard = job.index, argv = ?job.argv, "launching local shard");
        let child = process::spawn(&job.argv, Some(&job.workspace), &[], stdin, stdout, stderr)?;
        Ok(Box::new(LocalShardHandle {
            index: job.index,
            child,
            state: JobState::Running,
        }))
    }

    fn default_splits(&self) -> Result<usize> {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .map_err(|e| Error::Runner(format!("could not determine processor count: {e}")))
    }
}

struct LocalShardHandle {
    index: usize,
    child: std::process::Child,
    state: JobState,
}

impl LocalShardHandle {
    fn settle(&mut self, status: std::process::ExitStatus) -> JobState {
        let state = match status.code() {
            Some(code) => JobState::Exited(code),
            None => JobState::Killed,
        };
        self.state = state;
        tracing::info!(shard = self.index, ?state, "local shard finished");
        state
    }
}

impl ShardHandle for LocalShardHandle {
    fn poll(&mut self) -> Result<JobState> {
        if matches!(self.state, JobState::Exited(_) | JobState::Killed) {
            return Ok(self.state);
        }
        match self.child.try_wait()? {
            Some(status) => Ok(self.settle(status)),
            None => Ok(JobState::Running),
        }
    }

    fn wait(&mut self) -> Result<JobState> {
        if matches!(self.state, JobState::Exited(_) | JobState::Killed) {
            return Ok(self.state);
        }
        let status = self.child.wait()?;
        Ok(self.settle(status))
    }

    fn kill(&mut self) -> Result<()> {
        if matches!(self.state, JobState::Exited(_) | JobState::Killed) {
            return Ok(());
        }
        self.child.kill()?;
        self.state = JobState::Killed;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        // std::process::Child has no polite-terminate primitive; kill is
        // the only signal the standard library exposes on all platforms.
        self.kill()
    }
}
