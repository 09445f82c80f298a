//! Submits one shard per job to an external batch scheduler (e.g. HTCondor)
//! and polls for completion.
//!
//! Grounded on `original_source/psubprocess/condor_runner.py` throughout:
//! `write_condor_job_file` (job-file format), `Popen._launch_condor`
//! (submission + cluster-id parsing), `Popen.poll`/`wait`/`kill` (queue
//! polling and log scanning), and `get_default_splits` (`condor_status
//! -total`).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::process;
use crate::runner::{JobState, Runner, ShardHandle, ShardJob};

/// Mirrors `condor_runner.py`'s `runner_conf` dict.
#[derive(Debug, Clone)]
pub struct BatchRunnerConfig {
    /// Whether Condor should transfer files to/from the execute node.
    /// Default `true`, as in the original.
    pub transfer_files: bool,
    /// Where to write each shard's Condor log. When `None`, a file named
    /// `condor.log` is created in the shard's workspace.
    pub log_path: Option<PathBuf>,
    pub transfer_executable: bool,
    pub requirements: Option<String>,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        BatchRunnerConfig {
            transfer_files: true,
            log_path: None,
            transfer_executable: false,
            requirements: None,
        }
    }
}

pub struct BatchRunner {
    config: BatchRunnerConfig,
}

impl BatchRunner {
    pub fn new(config: BatchRunnerConfig) -> Self {
        BatchRunner { config }
    }

    fn resolve_executable(&self, argv0: &str) -> Result<PathBuf> {
        let path = Path::new(argv0);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if argv0.contains(std::path::MAIN_SEPARATOR) {
            return Ok(path.canonicalize()?);
        }
        resolve_in_path(argv0)
            .ok_or_else(|| Error::Runner(format!("{argv0}: not found in PATH")))
    }

    /// Checked per shard, against that shard's own output basenames — a job
    /// file is only ever wrong about its own files, never another shard's
    /// (`original_source/psubprocess/condor_runner.py::_remove_paths_from_cmd`
    /// performs the same check per `Popen` instance).
    fn check_transferability(&self, job: &ShardJob) -> Result<()> {
        if !self.config.transfer_files {
            return Ok(());
        }
        for name in &job.output_basenames {
            if Path::new(name).parent().is_some_and(|p| !p.as_os_str().is_empty()) {
                return Err(Error::Transferability(format!(
                    "output file {name:?} has a directory component; outputs are \
                     delivered to the submission directory, not to arbitrary paths"
                )));
            }
        }
        Ok(())
    }

    fn write_job_file(
        &self,
        job: &ShardJob,
        executable: &Path,
        log_path: &Path,
        job_file_path: &Path,
    ) -> Result<()> {
        let arguments = job.argv[1..].join(" ");
        let mut contents = String::new();
        contents.push_str(&format!("Executable = {}\n", executable.display()));
        contents.push_str(&format!("Arguments = \"{arguments}\"\n"));
        contents.push_str("Universe = vanilla\n");
        contents.push_str(&format!("Log = {}\n", log_path.display()));
        if self.config.transfer_files {
            contents.push_str("When_to_transfer_output = ON_EXIT\n");
        }
        contents.push_str("Getenv = True\n");
        if self.config.transfer_executable {
            contents.push_str("Transfer_executable = True\n");
        }
        if !job.input_basenames.is_empty() {
            contents.push_str(&format!(
                "Transfer_input_files = {}\n",
                job.input_basenames.join(",")
            ));
            if self.config.transfer_files {
                contents.push_str("Should_transfer_files = IF_NEEDED\n");
            }
        }
        if let Some(req) = &self.config.requirements {
            contents.push_str(&format!("Requirements = {req}\n"));
        }
        if let Some(stdout) = &job.stdout {
            contents.push_str(&format!("Output = {}\n", stdout.display()));
        }
        if let Some(stderr) = &job.stderr {
            contents.push_str(&format!("Error = {}\n", stderr.display()));
        }
        if let Some(stdin) = &job.stdin {
            contents.push_str(&format!("Input = {}\n", stdin.display()));
        }
        contents.push_str("Queue\n");
        fs::write(job_file_path, contents)?;
        Ok(())
    }
}

fn resolve_in_path(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

impl Runner for BatchRunner {
    fn spawn(&self, job: ShardJob) -> Result<Box<dyn ShardHandle>> {
        self.check_transferability(&job)?;
        let executable = self.resolve_executable(&job.argv[0])?;
        let log_path = self
            .config
            .log_path
            .clone()
            .unwrap_or_else(|| job.workspace.join("condor.log"));
        let job_file_path = job.workspace.join("condor.job");
        self.write_job_file(&job, &executable, &log_path, &job_file_path)?;

        let submit_argv = vec![
            "condor_submit".to_string(),
            job_file_path.to_string_lossy().into_owned(),
        ];
        let submit_out = process::run(&submit_argv, None, false)
            .map_err(|_| Error::Runner("condor_submit not found in your PATH".into()))?;
        if !submit_out.success() {
            return Err(Error::Runner(format!(
                "condor_submit failed: {}",
                String::from_utf8_lossy(&submit_out.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&submit_out.stdout);
        let cluster_id = stdout
            .lines()
            .find(|l| l.contains("submitted to cluster"))
            .and_then(|l| l.trim().trim_end_matches('.').split_whitespace().last())
            .ok_or_else(|| Error::Runner("could not parse cluster id from condor_submit output".into()))?
            .to_string();

        tracing::info!(shard = job.index, cluster_id, "submitted batch shard");

        Ok(Box::new(BatchShardHandle {
            index: job.index,
            cluster_id,
            log_path,
            state: JobState::Running,
        }))
    }

    fn default_splits(&self) -> Result<usize> {
        let out = process::run(&["condor_status", "-total"], None, false)
            .map_err(|_| Error::Runner("condor_status not found in your PATH".into()))?;
        if !out.success() {
            return Err(Error::Runner(format!(
                "condor_status failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        for line in stdout.lines() {
            let line = line.trim().to_lowercase();
            if line.starts_with("total") && !line.contains("owner") {
                let count: usize = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::Runner("could not parse condor_status output".into()))?;
                return Ok(count * 2);
            }
        }
        Err(Error::Runner("condor_status produced no total line".into()))
    }
}

struct BatchShardHandle {
    index: usize,
    cluster_id: String,
    log_path: PathBuf,
    state: JobState,
}

impl BatchShardHandle {
    /// Scans the Condor log file for a `return value N` line, as
    /// `condor_runner.py::_update_retcode` does.
    fn scan_log_for_retcode(&self) -> Result<Option<i32>> {
        let contents = match fs::read_to_string(&self.log_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut retcode = None;
        for line in contents.lines() {
            if let Some(rest) = line.split("return value").nth(1) {
                let cleaned = rest.trim().trim_end_matches(')');
                if let Ok(code) = cleaned.parse() {
                    retcode = Some(code);
                }
            }
        }
        Ok(retcode)
    }
}

impl ShardHandle for BatchShardHandle {
    fn poll(&mut self) -> Result<JobState> {
        if let JobState::Exited(_) | JobState::Killed = self.state {
            return Ok(self.state);
        }
        let argv = vec![
            "condor_q".to_string(),
            self.cluster_id.clone(),
            "-format".to_string(),
            "\"%d.\\n\"".to_string(),
            "ClusterId".to_string(),
        ];
        let out = process::run(&argv, None, false)?;
        if !out.success() {
            return Err(Error::Runner(format!(
                "condor_q failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        if !stdout.contains(&self.cluster_id) {
            if let Some(code) = self.scan_log_for_retcode()? {
                self.state = JobState::Exited(code);
            }
        }
        Ok(self.state)
    }

    fn wait(&mut self) -> Result<JobState> {
        if let JobState::Exited(_) | JobState::Killed = self.state {
            return Ok(self.state);
        }
        let argv = vec!["condor_wait".to_string(), self.log_path.to_string_lossy().into_owned()];
        let out = process::run(&argv, None, false)
            .map_err(|_| Error::Runner("condor_wait not found in your PATH".into()))?;
        if !out.success() {
            return Err(Error::Runner(format!(
                "condor_wait failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        match self.scan_log_for_retcode()? {
            Some(code) => {
                self.state = JobState::Exited(code);
                tracing::info!(shard = self.index, code, "batch shard finished");
            }
            None => self.state = JobState::Killed,
        }
        Ok(self.state)
    }

    fn kill(&mut self) -> Result<()> {
        let argv = vec!["condor_rm".to_string(), self.cluster_id.clone()];
        let out = process::run(&argv, None, false)
            .map_err(|_| Error::Runner("condor_rm not found in your PATH".into()))?;
        if !out.success() {
            return Err(Error::Runner(format!(
                "condor_rm failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        self.state = JobState::Killed;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_output_basenames(names: &[&str]) -> ShardJob {
        ShardJob {
            index: 0,
            workspace: PathBuf::from("/tmp/shard0"),
            argv: vec!["bin".to_string()],
            stdin: None,
            stdout: None,
            stderr: None,
            input_basenames: vec![],
            output_basenames: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn transferability_error_on_output_with_directory_component() {
        let runner = BatchRunner::new(BatchRunnerConfig::default());
        let job = job_with_output_basenames(&["sub/out.txt"]);
        let err = runner.check_transferability(&job).unwrap_err();
        assert!(matches!(err, Error::Transferability(_)));
    }

    #[test]
    fn bare_output_basename_is_fine() {
        let runner = BatchRunner::new(BatchRunnerConfig::default());
        let job = job_with_output_basenames(&["out.txt"]);
        runner.check_transferability(&job).unwrap();
    }

    #[test]
    fn transfer_disabled_skips_the_check_entirely() {
        let runner = BatchRunner::new(BatchRunnerConfig {
            transfer_files: false,
            ..Default::default()
        });
        let job = job_with_output_basenames(&["sub/out.txt"]);
        runner.check_transferability(&job).unwrap();
    }

    #[test]
    fn scan_log_for_retcode_parses_condor_style_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job.log");
        fs::write(&log, "005 (123.000.000) ... Job terminated.\n\t(1) Normal termination (return value 0)\n").unwrap();
        let handle = BatchShardHandle {
            index: 0,
            cluster_id: "123".into(),
            log_path: log,
            state: JobState::Running,
        };
        assert_eq!(handle.scan_log_for_retcode().unwrap(), Some(0));
    }
}
