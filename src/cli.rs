//! Command-line surface shared by both driver binaries: argument parsing,
//! schema loading, and signal-driven teardown.
//!
//! Grounded on `original_source/scripts/run_in_parallel.py` and
//! `run_with_condor.py`, both of which define an identical
//! `set_signal_handlers` (signal → kill the running `Popen` → exit(-1)).

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use clap::Parser;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::schema::StreamSchema;

/// Arguments common to both `run-in-parallel` and `run-with-condor`.
#[derive(Debug, Parser)]
pub struct CommonArgs {
    /// The command line to shard, as a single string (spec.md §6).
    #[arg(short = 'c', long = "command")]
    pub command: String,

    /// Requested shard count; defaults to the runner's own suggestion.
    #[arg(short = 'n', long = "splits")]
    pub splits: Option<usize>,

    /// Combined stdout destination; defaults to the caller's own stdout.
    #[arg(short = 'o', long = "stdout")]
    pub stdout: Option<PathBuf>,

    /// Combined stderr destination; defaults to the caller's own stderr.
    #[arg(short = 'e', long = "stderr")]
    pub stderr: Option<PathBuf>,

    /// Combined stdin source; defaults to the caller's own stdin.
    #[arg(short = 'i', long = "stdin")]
    pub stdin: Option<PathBuf>,

    /// Either a path to a JSON schema file, or a literal JSON schema
    /// expression (spec.md §6).
    #[arg(short = 'd', long = "schema")]
    pub schema: Option<String>,

    /// Batch scheduler requirements expression (ignored by the local
    /// runner).
    #[arg(short = 'q', long = "requirements")]
    pub requirements: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "run-in-parallel")]
pub struct ParallelArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Which runner back-end to dispatch shards to.
    #[arg(short = 'r', long = "runner", value_enum, default_value_t = RunnerKindArg::Subprocess)]
    pub runner: RunnerKindArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum RunnerKindArg {
    #[default]
    Subprocess,
    Condor,
}

#[derive(Debug, Parser)]
#[command(name = "run-with-condor")]
pub struct CondorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Where to write the batch scheduler's own log.
    #[arg(short = 'l', long = "log")]
    pub log: Option<PathBuf>,
}

/// `-d`'s value is either a path to a JSON file, or a JSON literal — spec.md
/// §9 resolves the source's Python `eval()` schema literal as JSON, the
/// closest safe analogue available in Rust.
pub fn load_schema(arg: &str) -> Result<StreamSchema> {
    let text = match fs::read_to_string(arg) {
        Ok(text) => text,
        Err(_) => arg.to_string(),
    };
    Ok(serde_json::from_str(&text)?)
}

/// Splits a shell-style command string into argv, honoring the inline schema
/// token syntax when the string contains any (spec.md §6).
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}

/// A trait-object handle the signal handler can reach through a single
/// construction-time registration cell, instead of reaching into
/// process-wide mutable state (Design Notes §9, "avoid process-wide mutable
/// state").
pub trait DispatcherHandle: Send {
    fn kill(&mut self) -> Result<()>;
}

impl DispatcherHandle for Dispatcher {
    fn kill(&mut self) -> Result<()> {
        Dispatcher::kill(self)
    }
}

#[allow(clippy::type_complexity)]
static ACTIVE_DISPATCHER: OnceLock<Mutex<Option<Arc<Mutex<dyn DispatcherHandle>>>>> = OnceLock::new();

/// Registers `dispatcher` so the signal handler installed by
/// [`install_signal_handlers`] can kill it. Call once, right after
/// `Dispatcher::construct` succeeds; the caller keeps its own clone of the
/// `Arc` to drive `wait` normally.
pub fn register_dispatcher(dispatcher: Arc<Mutex<dyn DispatcherHandle>>) {
    let cell = ACTIVE_DISPATCHER.get_or_init(|| Mutex::new(None));
    *cell.lock().unwrap() = Some(dispatcher);
}

extern "C" fn handle_termination_signal(_signum: libc::c_int) {
    if let Some(cell) = ACTIVE_DISPATCHER.get() {
        if let Ok(guard) = cell.lock() {
            if let Some(dispatcher) = guard.as_ref() {
                if let Ok(mut dispatcher) = dispatcher.lock() {
                    let _ = dispatcher.kill();
                }
            }
        }
    }
    let _ = std::io::stderr().write_all(b"parashard: terminated by signal\n");
    std::process::exit(-1);
}

/// Installs handlers for `SIGTERM`/`SIGINT`/`SIGABRT` that kill the
/// registered dispatcher before exiting `-1`, mirroring
/// `prunner.py::set_signal_handlers`.
#[cfg(unix)]
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_termination_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_termination_signal as libc::sighandler_t);
        libc::signal(libc::SIGABRT, handle_termination_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
pub fn install_signal_handlers() {}

/// Maps a surfaced [`Error`] to the driver shims' exit-code convention
/// (spec.md §6: dispatcher-level fatal errors exit `-1`).
pub fn report_and_exit_code(err: &Error) -> i32 {
    eprintln!("parashard: {}: {err}", err.kind());
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_breaks_on_whitespace() {
        assert_eq!(
            split_command("bin -i /tmp/in"),
            vec!["bin".to_string(), "-i".to_string(), "/tmp/in".to_string()]
        );
    }

    #[test]
    fn load_schema_accepts_a_literal_json_array() {
        let schema = load_schema("[]").unwrap();
        assert!(schema.is_empty());
    }
}
