//! Maps a [`JoinerSpec`] to a joiner function and provides the default
//! byte-concatenation joiner.
//!
//! Grounded on `original_source/psubprocess/prunner.py::default_cat_joiner`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::JoinerSpec;

/// Concatenates per-shard output files (in shard-index order, per spec.md
/// §5) into `out`, which the caller has already opened — a path-backed
/// file for most outputs, or the caller's own stdout/stderr handle for
/// stdio-bound outputs, so this trait never has to branch on which it is.
pub trait Joiner: Send + Sync {
    fn join(&self, out: &mut dyn Write, shard_paths: &[PathBuf]) -> Result<()>;
}

/// Byte-wise concatenation in shard order — the only joiner spec.md names
/// as a default. A shard path that doesn't exist (a shard that produced no
/// output for this stream) contributes nothing rather than erroring, since
/// spec.md's join policy runs joiners even after a failed shard.
pub struct ConcatJoiner;

impl Joiner for ConcatJoiner {
    fn join(&self, out: &mut dyn Write, shard_paths: &[PathBuf]) -> Result<()> {
        for shard_path in shard_paths {
            match File::open(shard_path) {
                Ok(mut shard) => {
                    io::copy(&mut shard, out)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

/// Resolves [`JoinerSpec`]s to [`Joiner`] implementations. `Concat` is
/// built in; callers register named joiners (e.g. for formats where naive
/// concatenation duplicates headers) via [`register`](Self::register).
#[derive(Default)]
pub struct JoinerRegistry {
    custom: HashMap<String, Arc<dyn Joiner>>,
}

impl JoinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, joiner: Arc<dyn Joiner>) {
        self.custom.insert(tag.into(), joiner);
    }

    pub fn resolve(&self, spec: &JoinerSpec) -> Result<Arc<dyn Joiner>> {
        match spec {
            JoinerSpec::Concat => Ok(Arc::new(ConcatJoiner) as Arc<dyn Joiner>),
            JoinerSpec::Named(tag) => self
                .custom
                .get(tag)
                .cloned()
                .ok_or_else(|| Error::Splitter(format!("no joiner registered for tag {tag:?}"))),
        }
    }
}

/// Convenience used when a binding declares no joiner at all — spec.md
/// §4.4: "when unspecified, Concat is used."
pub fn default_joiner() -> Arc<dyn Joiner> {
    Arc::new(ConcatJoiner)
}
