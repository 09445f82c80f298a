//! Resolve a [`StreamSchema`] against a concrete argv, producing the typed
//! [`StreamBinding`]s the splitter/joiner/runner stages operate on.
//!
//! Grounded on `original_source/psubprocess/streams.py::get_streams_from_cmd`
//! (schema-to-argv resolution) and `cmd_def_from_cmd.py` (the inline schema
//! token language).

use std::fs::File;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::schema::{JoinerSpec, ParamDef, SplitterSpec, StreamLocation, StreamRole, StreamSchema};

/// Normalized file reference: either a path on disk, or a handle the caller
/// already has open (standard streams). Unifying these at the binder
/// boundary means nothing downstream ever has to branch on "is this a
/// string or a handle?" (Design Notes §9).
#[derive(Debug)]
pub enum FileRef {
    Path(PathBuf),
    Handle(File),
}

/// Where a binding's file ultimately lives, once argv scanning is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLocation {
    Stdin,
    Stdout,
    Stderr,
    /// Index into argv holding the file token.
    Argv(usize),
}

/// A schema parameter resolved against a concrete argv: the original
/// [`ParamDef`], its file (if any was found), and where it sits.
#[derive(Debug)]
pub struct StreamBinding {
    pub param: ParamDef,
    pub file_ref: Option<FileRef>,
    pub resolved_location: Option<ResolvedLocation>,
}

impl StreamBinding {
    pub fn splitter(&self) -> Option<&SplitterSpec> {
        self.param.splitter.as_ref()
    }

    pub fn joiner(&self) -> Option<&JoinerSpec> {
        self.param.joiner.as_ref()
    }

    pub fn argv_index(&self) -> Option<usize> {
        match self.resolved_location {
            Some(ResolvedLocation::Argv(i)) => Some(i),
            _ => None,
        }
    }
}

/// Handles the caller already has open for the standard streams, supplied
/// independently of the schema (spec.md §4.2: "extended with synthetic
/// bindings for any provided stdio handle the schema omitted").
#[derive(Default)]
pub struct CallerStdio {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

/// Resolves `schema` against `argv`, then appends synthetic bindings for any
/// of `stdio`'s handles the schema didn't already cover.
pub fn bind_streams(
    argv: &[String],
    schema: &StreamSchema,
    mut stdio: CallerStdio,
) -> Result<Vec<StreamBinding>> {
    let mut bindings = Vec::with_capacity(schema.len() + 3);
    let mut claimed: Vec<(ResolvedLocation, StreamRole)> = Vec::new();
    let mut saw_stdin = false;
    let mut saw_stdout = false;
    let mut saw_stderr = false;

    for param in schema {
        let (resolved_location, file_ref) = match &param.location {
            StreamLocation::Stdin => {
                saw_stdin = true;
                (Some(ResolvedLocation::Stdin), stdio.stdin.take().map(FileRef::Handle))
            }
            StreamLocation::Stdout => {
                saw_stdout = true;
                (Some(ResolvedLocation::Stdout), stdio.stdout.take().map(FileRef::Handle))
            }
            StreamLocation::Stderr => {
                saw_stderr = true;
                (Some(ResolvedLocation::Stderr), stdio.stderr.take().map(FileRef::Handle))
            }
            StreamLocation::ArgvNamed(opts) => match find_option(argv, opts) {
                Some(p) => {
                    let loc = p + 1;
                    let file = argv.get(loc).map(|s| FileRef::Path(PathBuf::from(s)));
                    (Some(ResolvedLocation::Argv(loc)), file)
                }
                None => (None, None),
            },
            StreamLocation::ArgvPositional(i) => {
                let p = positional_index(*i, argv.len())?;
                if p >= argv.len() {
                    return Err(Error::Schema(format!(
                        "positional index {i} is out of range for argv of length {}",
                        argv.len()
                    )));
                }
                let loc = p + 1;
                let file = argv.get(loc).map(|s| FileRef::Path(PathBuf::from(s)));
                (Some(ResolvedLocation::Argv(loc)), file)
            }
        };

        if let Some(loc) = resolved_location {
            if let Some((_, existing_role)) =
                claimed.iter().find(|(l, _)| *l == loc)
            {
                if *existing_role != param.role {
                    return Err(Error::Schema(format!(
                        "{loc:?} is bound with conflicting roles"
                    )));
                }
            } else {
                claimed.push((loc, param.role));
            }
        }

        bindings.push(StreamBinding {
            param: param.clone(),
            file_ref,
            resolved_location,
        });
    }

    if stdio.stdin.is_some() && !saw_stdin {
        bindings.push(StreamBinding {
            param: ParamDef::new(StreamLocation::Stdin, StreamRole::Input),
            file_ref: stdio.stdin.take().map(FileRef::Handle),
            resolved_location: Some(ResolvedLocation::Stdin),
        });
    }
    if stdio.stdout.is_some() && !saw_stdout {
        bindings.push(StreamBinding {
            param: ParamDef::new(StreamLocation::Stdout, StreamRole::Output),
            file_ref: stdio.stdout.take().map(FileRef::Handle),
            resolved_location: Some(ResolvedLocation::Stdout),
        });
    }
    if stdio.stderr.is_some() && !saw_stderr {
        bindings.push(StreamBinding {
            param: ParamDef::new(StreamLocation::Stderr, StreamRole::Output),
            file_ref: stdio.stderr.take().map(FileRef::Handle),
            resolved_location: Some(ResolvedLocation::Stderr),
        });
    }

    Ok(bindings)
}

fn find_option(argv: &[String], opts: &[String]) -> Option<usize> {
    argv.iter().position(|tok| opts.iter().any(|o| o == tok))
}

/// `p = i if i >= 0 else |argv| + i`, as specified in spec.md §4.2.
fn positional_index(i: i64, argv_len: usize) -> Result<usize> {
    let p = if i >= 0 { i } else { argv_len as i64 + i };
    if p < 0 {
        return Err(Error::Schema(format!(
            "positional index {i} is out of range for argv of length {argv_len}"
        )));
    }
    Ok(p as usize)
}

/// Clones `param` minus its file reference, used when rewriting argv
/// requires remembering the schema shape without the borrowed file handle.
impl Clone for StreamBinding {
    fn clone(&self) -> Self {
        StreamBinding {
            param: self.param.clone(),
            file_ref: None,
            resolved_location: self.resolved_location,
        }
    }
}

/// Parses the inline schema token language out of a raw command string's
/// argv, returning the cleaned argv plus the `ParamDef`s it implies.
///
/// Tokens look like `>defn#value#` (input) or `<defn#value#` (output),
/// where `defn` is `;`-separated `key=val` pairs. Ported from
/// `cmd_def_from_cmd.py::get_cmd_def_from_cmd`.
pub fn parse_inline_schema(argv: &[String]) -> Result<(Vec<String>, StreamSchema)> {
    let mut new_argv = Vec::with_capacity(argv.len());
    let mut schema = StreamSchema::new();

    for (index, arg) in argv.iter().enumerate() {
        let is_inline = arg.starts_with(['>', '<']) && arg.ends_with('#');
        if !is_inline {
            new_argv.push(arg.clone());
            continue;
        }
        let role = match arg.chars().next() {
            Some('>') => StreamRole::Input,
            Some('<') => StreamRole::Output,
            _ => unreachable!("checked by starts_with above"),
        };
        // Strip the leading marker and the trailing '#'.
        let body = &arg[1..arg.len() - 1];
        let (defn, value) = body.split_once('#').ok_or_else(|| {
            Error::Schema(format!("malformed inline schema token: {arg}"))
        })?;

        new_argv.push(value.to_string());

        let location = if let Some(opt) = value.strip_prefix('-') {
            StreamLocation::ArgvNamed(vec![format!("-{opt}")])
        } else {
            StreamLocation::ArgvPositional(index as i64)
        };
        let mut param = ParamDef::new(location, role);

        for item in defn.split(';') {
            if item.is_empty() {
                continue;
            }
            let (key, val) = item.split_once('=').ok_or_else(|| {
                Error::Schema(format!("malformed inline schema definition: {item}"))
            })?;
            match key {
                "splitter" => param.splitter = Some(SplitterSpec::Regex(val.to_string())),
                "joiner" => param.joiner = Some(JoinerSpec::Named(val.to_string())),
                other => {
                    tracing::warn!(key = other, "ignoring unrecognized inline schema key");
                }
            }
        }
        schema.push(param);
    }

    Ok((new_argv, schema))
}
