//! Orchestrates one parallel run end to end: binds streams, fixes the
//! effective shard count, splits every stream into per-shard files, spawns
//! one job per shard through a [`Runner`], waits for all of them, joins the
//! outputs back together, and reports a single return code.
//!
//! Grounded on `original_source/psubprocess/prunner.py`'s `Popen` class:
//! `__init__`/`_split_streams` (the two-pass split below), `_create_cmds`
//! (argv rewriting), `wait`/`_collect_output_streams`/`_collect_retcodes`
//! (join-always-runs-even-on-failure), and `kill`/`terminate`.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::binder::{bind_streams, CallerStdio, FileRef, ResolvedLocation, StreamBinding};
use crate::error::{Error, Result};
use crate::joiner::JoinerRegistry;
use crate::runner::{JobState, Runner, ShardHandle, ShardJob};
use crate::schema::StreamSchema;
use crate::splitter::SplitterRegistry;
use crate::workspace::ShardWorkspace;

/// The dispatcher's own lifecycle, distinct from any one shard's
/// [`JobState`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Splitting,
    Launched,
    Waiting,
    Joining,
    Done,
    Killed,
}

/// Knobs that don't belong on [`StreamSchema`] itself: how many shards to
/// request, and where shard workspaces are rooted.
#[derive(Default)]
pub struct DispatcherConfig {
    pub requested_splits: Option<usize>,
    pub workspace_parent: Option<PathBuf>,
}

/// Runs one command in parallel across `K` shards and joins the results.
pub struct Dispatcher {
    bindings: Vec<StreamBinding>,
    shard_files: Vec<Vec<PathBuf>>,
    workspaces: Vec<ShardWorkspace>,
    handles: Vec<Box<dyn ShardHandle>>,
    joiners: JoinerRegistry,
    state: DispatcherState,
    returncode: Option<i32>,
}

impl Dispatcher {
    /// Binds `schema` against `argv`, fixes the effective shard count, and
    /// splits every stream — the full two-pass algorithm from spec.md §4.8.
    ///
    /// Pass A walks bindings in schema order; the first Input binding that
    /// requires a splitter fixes `K = min(requested, record_count)` (erroring
    /// [`Error::EmptyInput`] if that count is zero), and every later one that
    /// requires a splitter must produce at least `K` records. Pass B then
    /// creates `K` workspaces and writes every binding's shard files — inputs
    /// through their resolved splitter, outputs and no-split inputs through
    /// `Passthrough` — before spawning one job per shard.
    #[allow(clippy::too_many_arguments)]
    pub fn construct(
        argv: &[String],
        schema: &StreamSchema,
        stdio: CallerStdio,
        runner: &dyn Runner,
        splitters: &SplitterRegistry,
        joiners: JoinerRegistry,
        config: DispatcherConfig,
    ) -> Result<Dispatcher> {
        let mut bindings = bind_streams(argv, schema, stdio)?;
        let mut contents: Vec<Option<Vec<u8>>> = vec![None; bindings.len()];

        // Pass A: fix K from the first splittable input, in schema order.
        let mut k: Option<usize> = None;
        for i in 0..bindings.len() {
            if !bindings[i].param.requires_splitter() {
                continue;
            }
            let splitter = splitters.resolve_for_binding(&bindings[i])?;
            let content = read_required_content(&mut bindings[i])?;
            let record_count = splitter.record_count(&content);

            match k {
                None => {
                    if record_count == 0 {
                        return Err(Error::EmptyInput);
                    }
                    let requested = match config.requested_splits {
                        Some(n) => n,
                        None => runner.default_splits()?,
                    };
                    k = Some(requested.min(record_count));
                }
                Some(fixed) => {
                    if record_count < fixed {
                        return Err(Error::Splitter(format!(
                            "input has only {record_count} record(s) but {fixed} shard(s) were \
                             already fixed by an earlier input"
                        )));
                    }
                }
            }
            contents[i] = Some(content);
        }
        let k = match k {
            Some(k) => k,
            None => config
                .requested_splits
                .map(Ok)
                .unwrap_or_else(|| runner.default_splits())?,
        };

        // Pass B: create the workspaces, then write every binding's shards.
        let workspaces: Result<Vec<ShardWorkspace>> = (0..k)
            .map(|_| ShardWorkspace::create(config.workspace_parent.as_deref()))
            .collect();
        let workspaces = workspaces?;
        let workspace_paths: Vec<PathBuf> =
            workspaces.iter().map(|w| w.path().to_path_buf()).collect();

        let mut shard_files = Vec::with_capacity(bindings.len());
        for i in 0..bindings.len() {
            let splitter = splitters.resolve_for_binding(&bindings[i])?;
            let content = match contents[i].take() {
                Some(c) => c,
                // Output bindings' file_refs are write-only destinations
                // (a freshly created file, or the caller's own stdout/
                // stderr handle); only Input bindings are ever read here.
                None if bindings[i].param.role == crate::schema::StreamRole::Input => {
                    match bindings[i].file_ref.as_mut() {
                        Some(file_ref) => read_content(file_ref)?,
                        None => Vec::new(),
                    }
                }
                None => Vec::new(),
            };
            let (label, suffix) = label_and_suffix(&bindings[i], i);
            let mode = source_mode(&bindings[i]);
            let paths = splitter.write_shards(&content, mode, &label, &suffix, &workspace_paths)?;
            shard_files.push(paths);
        }

        let mut handles = Vec::with_capacity(k);
        for s in 0..k {
            let mut shard_argv = argv.to_vec();
            let mut stdin = None;
            let mut stdout = None;
            let mut stderr = None;
            let mut input_basenames = Vec::new();
            let mut output_basenames = Vec::new();
            for i in 0..bindings.len() {
                let path = &shard_files[i][s];
                match bindings[i].resolved_location {
                    Some(ResolvedLocation::Argv(idx)) => {
                        let name = basename(path);
                        shard_argv[idx] = name.clone();
                        if !bindings[i].param.special.no_transfer {
                            match bindings[i].param.role {
                                crate::schema::StreamRole::Input => input_basenames.push(name),
                                crate::schema::StreamRole::Output => output_basenames.push(name),
                            }
                        }
                    }
                    Some(ResolvedLocation::Stdin) => stdin = Some(path.clone()),
                    Some(ResolvedLocation::Stdout) => stdout = Some(path.clone()),
                    Some(ResolvedLocation::Stderr) => stderr = Some(path.clone()),
                    None => {}
                }
            }
            tracing::info!(shard = s, argv = ?shard_argv, "dispatching shard");
            let job = ShardJob {
                index: s,
                workspace: workspace_paths[s].clone(),
                argv: shard_argv,
                stdin,
                stdout,
                stderr,
                input_basenames,
                output_basenames,
            };
            handles.push(runner.spawn(job)?);
        }

        Ok(Dispatcher {
            bindings,
            shard_files,
            workspaces,
            handles,
            joiners,
            state: DispatcherState::Launched,
            returncode: None,
        })
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Non-blocking check: the dispatcher's own state, without joining.
    pub fn poll(&mut self) -> Result<DispatcherState> {
        if matches!(self.state, DispatcherState::Done | DispatcherState::Killed) {
            return Ok(self.state);
        }
        let mut all_finished = true;
        for h in &mut self.handles {
            if matches!(h.poll()?, JobState::Pending | JobState::Running) {
                all_finished = false;
            }
        }
        if all_finished {
            self.state = DispatcherState::Waiting;
        }
        Ok(self.state)
    }

    /// Waits for every shard, joins outputs, and cleans up workspaces — in
    /// that order, always, even if a shard exited non-zero (spec.md §5: "the
    /// join step runs regardless of shard exit codes").
    pub fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.returncode {
            return Ok(code);
        }
        self.state = DispatcherState::Waiting;
        let mut states = Vec::with_capacity(self.handles.len());
        for h in &mut self.handles {
            states.push(h.wait()?);
        }

        self.state = DispatcherState::Joining;
        self.join_outputs()?;
        for ws in &mut self.workspaces {
            ws.close();
        }

        self.state = DispatcherState::Done;
        let code = returncode_from_states(&states);
        self.returncode = Some(code);
        Ok(code)
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Kills every shard immediately; outputs are not joined.
    pub fn kill(&mut self) -> Result<()> {
        for h in &mut self.handles {
            h.kill()?;
        }
        self.state = DispatcherState::Killed;
        self.returncode = Some(-1);
        Ok(())
    }

    pub fn terminate(&mut self) -> Result<()> {
        for h in &mut self.handles {
            h.terminate()?;
        }
        self.state = DispatcherState::Killed;
        self.returncode = Some(-1);
        Ok(())
    }

    fn join_outputs(&mut self) -> Result<()> {
        use crate::schema::StreamRole;

        for i in 0..self.bindings.len() {
            if self.bindings[i].param.role != StreamRole::Output {
                continue;
            }
            let joiner = match self.bindings[i].joiner() {
                Some(spec) => self.joiners.resolve(spec)?,
                None => crate::joiner::default_joiner(),
            };
            let shard_paths = &self.shard_files[i];
            match self.bindings[i].file_ref.as_mut() {
                Some(FileRef::Path(path)) => {
                    let mut out = File::create(path)?;
                    joiner.join(&mut out, shard_paths)?;
                }
                Some(FileRef::Handle(handle)) => {
                    joiner.join(handle, shard_paths)?;
                }
                None => {
                    // No destination to deliver to (e.g. an advisory
                    // no-support output); nothing to join.
                }
            }
        }
        Ok(())
    }
}

fn read_required_content(binding: &mut StreamBinding) -> Result<Vec<u8>> {
    match binding.file_ref.as_mut() {
        Some(file_ref) => read_content(file_ref),
        None => Err(Error::Schema(
            "an input binding that requires a splitter has no file".into(),
        )),
    }
}

fn read_content(file_ref: &mut FileRef) -> Result<Vec<u8>> {
    match file_ref {
        FileRef::Path(path) => Ok(fs::read(path)?),
        FileRef::Handle(file) => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Shard file names are derived from the source's own basename when there is
/// one (so a shard of `reads.fasta` is named `reads<N>.fasta`), and from the
/// binding's resolved location otherwise.
fn label_and_suffix(binding: &StreamBinding, index: usize) -> (String, String) {
    if let Some(FileRef::Path(p)) = &binding.file_ref {
        let stem = p
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("stream{index}"));
        let suffix = p
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        return (stem, suffix);
    }
    let label = match binding.resolved_location {
        Some(ResolvedLocation::Stdin) => "stdin".to_string(),
        Some(ResolvedLocation::Stdout) => "stdout".to_string(),
        Some(ResolvedLocation::Stderr) => "stderr".to_string(),
        Some(ResolvedLocation::Argv(i)) => format!("arg{i}"),
        None => format!("stream{index}"),
    };
    (label, String::new())
}

fn source_mode(binding: &StreamBinding) -> Option<u32> {
    match &binding.file_ref {
        Some(FileRef::Path(p)) => fs::metadata(p).ok().map(|m| m.permissions().mode()),
        _ => None,
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// 0 iff every shard exited 0; otherwise the first non-zero code in
/// ascending shard order, with a killed or still-running shard standing in
/// as `-1` (spec.md §6).
fn returncode_from_states(states: &[JobState]) -> i32 {
    for state in states {
        match state {
            JobState::Exited(0) => continue,
            JobState::Exited(code) => return *code,
            JobState::Killed | JobState::Pending | JobState::Running => return -1,
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returncode_is_zero_when_every_shard_succeeds() {
        let states = vec![JobState::Exited(0), JobState::Exited(0)];
        assert_eq!(returncode_from_states(&states), 0);
    }

    #[test]
    fn returncode_is_the_first_nonzero_code_by_ascending_index() {
        let states = vec![JobState::Exited(0), JobState::Exited(3), JobState::Exited(7)];
        assert_eq!(returncode_from_states(&states), 3);
    }

    #[test]
    fn returncode_is_negative_one_when_a_shard_was_killed() {
        let states = vec![JobState::Exited(0), JobState::Killed];
        assert_eq!(returncode_from_states(&states), -1);
    }

    #[test]
    fn basename_strips_the_directory_component() {
        assert_eq!(basename(Path::new("/tmp/shard-a/in0.txt")), "in0.txt");
    }
}
