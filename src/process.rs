//! Spawn one child process, capture or redirect its stdio, and report its
//! exit code.
//!
//! This is the bottom layer every runner is built on (spec §4.1). It is
//! deliberately small: a single child, no shell, no pipelines. The local and
//! batch runners each build their own notion of "a shard" on top of it.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};

/// Where a child's stdin should come from / stdout and stderr should go.
#[derive(Debug)]
pub enum Redirection {
    /// Inherit the parent's stream.
    Inherit,
    /// Capture into memory (stdout/stderr only).
    Pipe,
    /// Read from / write to the given file.
    File(File),
    /// `/dev/null` (or `nul` on Windows).
    Null,
}

impl Redirection {
    fn into_stdio(self) -> Result<Stdio> {
        Ok(match self {
            Redirection::Inherit => Stdio::inherit(),
            Redirection::Pipe => Stdio::piped(),
            Redirection::File(f) => Stdio::from(f),
            Redirection::Null => Stdio::from(open_null()?),
        })
    }
}

#[cfg(unix)]
fn open_null() -> Result<File> {
    Ok(File::options().read(true).write(true).open("/dev/null")?)
}

#[cfg(windows)]
fn open_null() -> Result<File> {
    Ok(File::options().read(true).write(true).open("nul")?)
}

/// The outcome of running a child to completion: its captured streams (if
/// redirected to `Pipe`) and its exit code.
#[derive(Debug, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` only if the process was killed by a signal (Unix).
    pub code: Option<i32>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Restores the default `SIGPIPE` disposition in the child.
///
/// Rust's runtime ignores `SIGPIPE` so that writes to a closed pipe return
/// an `EPIPE` error rather than killing the process; external programs
/// expect the opposite (Unix) default, the same assumption
/// `original_source/psubprocess/utils.py::call`'s `subprocess_setup` makes
/// with `signal.signal(SIGPIPE, SIG_DFL)`.
#[cfg(unix)]
fn restore_default_sigpipe(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn restore_default_sigpipe(_cmd: &mut Command) {}

/// Spawns `argv[0]` with `argv[1..]`, in `cwd` if given, with `env`
/// overlaying the parent's environment, redirecting stdin/stdout/stderr as
/// requested, and returns the running `Child`.
pub fn spawn(
    argv: &[impl AsRef<OsStr>],
    cwd: Option<&Path>,
    env: &[(String, String)],
    stdin: Redirection,
    stdout: Redirection,
    stderr: Redirection,
) -> Result<Child> {
    if argv.is_empty() {
        return Err(Error::Runner("argv must not be empty".into()));
    }
    let mut cmd = Command::new(argv[0].as_ref());
    cmd.args(argv[1..].iter().map(AsRef::as_ref));
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdin(stdin.into_stdio()?);
    cmd.stdout(stdout.into_stdio()?);
    cmd.stderr(stderr.into_stdio()?);
    restore_default_sigpipe(&mut cmd);

    tracing::debug!(
        argv = ?argv.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
        "spawning child"
    );

    cmd.spawn().map_err(Error::Io)
}

/// Runs `argv` to completion, optionally feeding `stdin_data`, and captures
/// stdout/stderr.
///
/// When `check` is `true`, a non-zero exit produces
/// [`Error::ExternalCommand`] carrying the argv and captured streams — the
/// Rust equivalent of `original_source/psubprocess/utils.py::call(...,
/// raise_on_error=True)`.
pub fn run(argv: &[impl AsRef<OsStr>], stdin_data: Option<&[u8]>, check: bool) -> Result<Output> {
    let stdin = if stdin_data.is_some() {
        Redirection::Pipe
    } else {
        Redirection::Inherit
    };
    let mut child = spawn(argv, None, &[], stdin, Redirection::Pipe, Redirection::Pipe)?;

    if let Some(data) = stdin_data {
        // Write on a scoped handle so the pipe closes (sending EOF) before we
        // read stdout/stderr, avoiding a deadlock with a chatty child.
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(data)?;
        drop(stdin);
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    child
        .stdout
        .take()
        .expect("stdout was piped")
        .read_to_end(&mut stdout)?;
    child
        .stderr
        .take()
        .expect("stderr was piped")
        .read_to_end(&mut stderr)?;
    let status = child.wait()?;
    let output = Output {
        stdout,
        stderr,
        code: status.code(),
    };

    if check && !output.success() {
        return Err(Error::ExternalCommand {
            argv: argv
                .iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned())
                .collect(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let out = run(&["echo", "hola"], None, false).unwrap();
        assert_eq!(out.stdout, b"hola\n");
        assert!(out.success());
    }

    #[test]
    fn run_feeds_stdin() {
        let out = run(&["cat"], Some(b"hola"), false).unwrap();
        assert_eq!(out.stdout, b"hola");
    }

    #[test]
    fn run_check_reports_nonzero_exit() {
        let err = run(&["sh", "-c", "exit 20"], None, true).unwrap_err();
        match err {
            Error::ExternalCommand { code, .. } => assert_eq!(code, Some(20)),
            other => panic!("expected ExternalCommand, got {other:?}"),
        }
    }

    #[test]
    fn run_without_check_never_errors_on_nonzero() {
        let out = run(&["sh", "-c", "exit 20"], None, false).unwrap();
        assert_eq!(out.code, Some(20));
    }
}
