//! Maps a [`SplitterSpec`] to a splitter implementation and provides the
//! built-in splitters themselves.
//!
//! Grounded on `original_source/psubprocess/splitters.py`: the balanced
//! partition arithmetic (`_calculate_divisions`), the regex item counter and
//! cutter (`_re_item_counter`/`_items_in_file`), and the no-split passthrough
//! (`create_non_splitter_splitter`).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use crate::binder::StreamBinding;
use crate::error::{Error, Result};
use crate::schema::{PassthroughKind, SplitterSpec};

/// Splits one input file's bytes into per-shard files, or produces one
/// per-shard placeholder/copy for non-splittable streams.
pub trait Splitter: Send + Sync {
    /// Number of records `content` contains under this splitter's boundary
    /// rule. Only meaningful for record-based splitters; passthrough
    /// splitters are never used to fix the effective shard count (spec.md
    /// §4.8 processes splittable inputs before passthrough ones), so they
    /// return a sentinel that never constrains it.
    fn record_count(&self, content: &[u8]) -> usize;

    /// Writes one file per entry of `workspaces`, named `{label}{suffix}`
    /// inside each, and returns the paths in workspace order.
    ///
    /// Callers must ensure `record_count(content) >= workspaces.len()` for
    /// record-based splitters; violating that is a fatal shard-count
    /// mismatch the caller reports as [`Error::Splitter`], not a panic here.
    fn write_shards(
        &self,
        content: &[u8],
        mode: Option<u32>,
        label: &str,
        suffix: &str,
        workspaces: &[PathBuf],
    ) -> Result<Vec<PathBuf>>;
}

/// For R records and K shards: `r = R mod K` shards of `ceil(R/K)` records
/// followed by `K - r` shards of `floor(R/K)` records — larger shards first
/// (spec.md §8 property 3; ported from
/// `splitters.py::_calculate_divisions`/`prunner.py::_calculate_divisions`,
/// identical in both).
fn balanced_partition(records: usize, shards: usize) -> Vec<usize> {
    if shards == 0 {
        return Vec::new();
    }
    let r = records % shards;
    let small = records / shards;
    let large = small + 1;
    let mut sizes = Vec::with_capacity(shards);
    sizes.extend(std::iter::repeat(large).take(r));
    sizes.extend(std::iter::repeat(small).take(shards - r));
    sizes
}

fn write_file(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(content)?;
    drop(f);
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

fn shard_path(workspace: &Path, label: &str, suffix: &str) -> PathBuf {
    workspace.join(format!("{label}{suffix}"))
}

/// Splits wherever a line contains (plain string) or matches (regex) the
/// pattern. An empty pattern matches every line, so every line becomes its
/// own record — see `splitters.py::_items_in_file`/`_re_item_counter`.
pub struct RegexSplitter {
    pattern: String,
    regex: Option<Regex>,
}

impl RegexSplitter {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let regex = if is_plain_pattern(&pattern) {
            None
        } else {
            Some(Regex::new(&pattern).map_err(|e| Error::Splitter(e.to_string()))?)
        };
        Ok(RegexSplitter { pattern, regex })
    }

    fn is_boundary(&self, line: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(line),
            None => line.contains(self.pattern.as_str()),
        }
    }

    fn records<'a>(&self, content: &'a str) -> Vec<&'a str> {
        let mut records = Vec::new();
        let mut start = 0;
        let mut seen_first = false;
        let mut offset = 0;
        for line in split_keep_newlines(content) {
            if self.is_boundary(line) && seen_first {
                records.push(&content[start..offset]);
                start = offset;
            }
            seen_first = true;
            offset += line.len();
        }
        if seen_first {
            records.push(&content[start..]);
        }
        records
    }
}

/// A regex is "plain" (treated as literal substring search) when it
/// contains none of the characters that give regexes their meaning —
/// spec.md §4.3: "string-contains for plain strings, regex search
/// otherwise".
fn is_plain_pattern(pattern: &str) -> bool {
    !pattern.contains(['.', '+', '*', '?', '[', ']', '^', '$', '(', ')', '{', '}', '|', '\\'])
}

/// Splits `content` into lines, each element including its trailing `\n` if
/// present, so concatenating all elements reproduces `content` exactly.
fn split_keep_newlines(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            lines.push(&content[start..=i]);
            start = i + 1;
        }
    }
    if start < content.len() {
        lines.push(&content[start..]);
    }
    lines
}

impl Splitter for RegexSplitter {
    fn record_count(&self, content: &[u8]) -> usize {
        let text = String::from_utf8_lossy(content);
        self.records(&text).len()
    }

    fn write_shards(
        &self,
        content: &[u8],
        mode: Option<u32>,
        label: &str,
        suffix: &str,
        workspaces: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let text = String::from_utf8_lossy(content);
        let records = self.records(&text);
        if records.len() < workspaces.len() {
            return Err(Error::Splitter(format!(
                "input has only {} record(s) but {} shard(s) were requested",
                records.len(),
                workspaces.len()
            )));
        }
        let sizes = balanced_partition(records.len(), workspaces.len());
        let mut paths = Vec::with_capacity(workspaces.len());
        let mut cursor = 0;
        for (workspace, size) in workspaces.iter().zip(sizes) {
            let chunk: String = records[cursor..cursor + size].concat();
            cursor += size;
            let path = shard_path(workspace, label, suffix);
            write_file(&path, chunk.as_bytes(), mode)?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Record boundary is any line that is empty or all-whitespace; the one
/// built-in `Kind` tag this crate ships (spec.md §4.3 names `fastq`/`bam` as
/// examples, both out of scope per spec.md §1 — `SplitterRegistry::register`
/// is the extension point for callers who need them).
pub struct BlankLineSplitter;

impl BlankLineSplitter {
    fn records<'a>(&self, content: &'a str) -> Vec<&'a str> {
        let mut records = Vec::new();
        let mut start = 0;
        let mut seen_first = false;
        let mut offset = 0;
        for line in split_keep_newlines(content) {
            let is_boundary = line.trim().is_empty();
            if is_boundary && seen_first {
                records.push(&content[start..offset]);
                start = offset;
            }
            seen_first = true;
            offset += line.len();
        }
        if seen_first {
            records.push(&content[start..]);
        }
        records
    }
}

impl Splitter for BlankLineSplitter {
    fn record_count(&self, content: &[u8]) -> usize {
        let text = String::from_utf8_lossy(content);
        self.records(&text).len()
    }

    fn write_shards(
        &self,
        content: &[u8],
        mode: Option<u32>,
        label: &str,
        suffix: &str,
        workspaces: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let text = String::from_utf8_lossy(content);
        let records = self.records(&text);
        if records.len() < workspaces.len() {
            return Err(Error::Splitter(format!(
                "input has only {} record(s) but {} shard(s) were requested",
                records.len(),
                workspaces.len()
            )));
        }
        let sizes = balanced_partition(records.len(), workspaces.len());
        let mut paths = Vec::with_capacity(workspaces.len());
        let mut cursor = 0;
        for (workspace, size) in workspaces.iter().zip(sizes) {
            let chunk: String = records[cursor..cursor + size].concat();
            cursor += size;
            let path = shard_path(workspace, label, suffix);
            write_file(&path, chunk.as_bytes(), mode)?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// `copy` writes an identical copy of the source into every workspace
/// (no-split inputs); `empty` only reserves a placeholder path per
/// workspace, for outputs the child process will create itself.
pub struct PassthroughSplitter {
    pub kind: PassthroughKind,
}

impl Splitter for PassthroughSplitter {
    fn record_count(&self, _content: &[u8]) -> usize {
        // Passthrough splitters never fix K (spec.md §4.8); this value is
        // never consulted for that purpose.
        usize::MAX
    }

    fn write_shards(
        &self,
        content: &[u8],
        mode: Option<u32>,
        label: &str,
        suffix: &str,
        workspaces: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(workspaces.len());
        for workspace in workspaces {
            let path = shard_path(workspace, label, suffix);
            match self.kind {
                PassthroughKind::Copy => write_file(&path, content, mode)?,
                PassthroughKind::Empty => {}
            }
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Resolves [`SplitterSpec`]s to [`Splitter`] implementations, and picks the
/// right splitter for a binding per spec.md §4.3 ("the registry picks
/// `Passthrough(copy)` when the binding carries `NoSplit`; otherwise uses
/// the binding's declared splitter. Output bindings always use
/// `Passthrough(empty)`").
#[derive(Default)]
pub struct SplitterRegistry {
    custom: HashMap<String, Arc<dyn Splitter>>,
}

impl SplitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a splitter under `tag`, resolved when a schema names
    /// `SplitterSpec::Kind(tag)` or `SplitterSpec::Custom(tag)`.
    pub fn register(&mut self, tag: impl Into<String>, splitter: Arc<dyn Splitter>) {
        self.custom.insert(tag.into(), splitter);
    }

    pub fn resolve(&self, spec: &SplitterSpec) -> Result<Arc<dyn Splitter>> {
        match spec {
            SplitterSpec::Regex(pattern) => {
                Ok(Arc::new(RegexSplitter::new(pattern.clone())?) as Arc<dyn Splitter>)
            }
            SplitterSpec::Passthrough(kind) => {
                Ok(Arc::new(PassthroughSplitter { kind: *kind }) as Arc<dyn Splitter>)
            }
            SplitterSpec::Kind(tag) | SplitterSpec::Custom(tag) => {
                if tag == "blank-line" {
                    return Ok(Arc::new(BlankLineSplitter) as Arc<dyn Splitter>);
                }
                self.custom
                    .get(tag)
                    .cloned()
                    .ok_or_else(|| Error::Splitter(format!("no splitter registered for tag {tag:?}")))
            }
        }
    }

    /// Picks the splitter for one binding, applying the `NoSplit`/output
    /// overrides before falling back to the binding's declared splitter.
    pub fn resolve_for_binding(&self, binding: &StreamBinding) -> Result<Arc<dyn Splitter>> {
        use crate::schema::StreamRole;

        if binding.param.role == StreamRole::Output {
            return self.resolve(&SplitterSpec::Passthrough(PassthroughKind::Empty));
        }
        if binding.param.special.no_split {
            return self.resolve(&SplitterSpec::Passthrough(PassthroughKind::Copy));
        }
        match binding.splitter() {
            Some(spec) => self.resolve(spec),
            None => Err(Error::Splitter(
                "input binding has no splitter and is not marked no_split".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn balanced_partition_matches_spec_property() {
        let sizes = balanced_partition(10, 3);
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }

    #[test]
    fn balanced_partition_evenly_divides() {
        assert_eq!(balanced_partition(9, 3), vec![3, 3, 3]);
    }

    #[test]
    fn regex_splitter_counts_blast_style_records() {
        let splitter = RegexSplitter::new(">").unwrap();
        let content = b">hola1\nhola2\n>hola3\nhola4\n>hola5\n";
        assert_eq!(splitter.record_count(content), 3);
    }

    #[test]
    fn regex_splitter_empty_pattern_splits_every_line() {
        let splitter = RegexSplitter::new("").unwrap();
        let content = b"a\nb\nc\n";
        assert_eq!(splitter.record_count(content), 3);
    }

    #[test]
    fn regex_splitter_round_trips_content() {
        let dir = tempdir().unwrap();
        let ws: Vec<PathBuf> = (0..2).map(|i| dir.path().join(format!("ws{i}"))).collect();
        for w in &ws {
            fs::create_dir(w).unwrap();
        }
        let splitter = RegexSplitter::new(">").unwrap();
        let content = b">a\n1\n>b\n2\n>c\n3\n>d\n4\n";
        let paths = splitter
            .write_shards(content, None, "in", ".txt", &ws)
            .unwrap();
        let joined: Vec<u8> = paths.iter().flat_map(|p| fs::read(p).unwrap()).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn write_shards_errors_when_records_fewer_than_shards() {
        let dir = tempdir().unwrap();
        let ws: Vec<PathBuf> = (0..5).map(|i| dir.path().join(format!("ws{i}"))).collect();
        for w in &ws {
            fs::create_dir(w).unwrap();
        }
        let splitter = RegexSplitter::new(">").unwrap();
        let err = splitter
            .write_shards(b">a\n1\n", None, "in", ".txt", &ws)
            .unwrap_err();
        assert!(matches!(err, Error::Splitter(_)));
    }

    #[test]
    fn passthrough_copy_duplicates_into_every_workspace() {
        let dir = tempdir().unwrap();
        let ws: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("ws{i}"))).collect();
        for w in &ws {
            fs::create_dir(w).unwrap();
        }
        let splitter = PassthroughSplitter { kind: PassthroughKind::Copy };
        let paths = splitter
            .write_shards(b"hola", None, "in", ".txt", &ws)
            .unwrap();
        for p in paths {
            assert_eq!(fs::read(p).unwrap(), b"hola");
        }
    }

    #[test]
    fn passthrough_empty_reserves_paths_without_creating_files() {
        let dir = tempdir().unwrap();
        let ws: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("ws{i}"))).collect();
        for w in &ws {
            fs::create_dir(w).unwrap();
        }
        let splitter = PassthroughSplitter { kind: PassthroughKind::Empty };
        let paths = splitter
            .write_shards(b"", None, "out", ".txt", &ws)
            .unwrap();
        for p in paths {
            assert!(!p.exists());
        }
    }

    #[test]
    fn blank_line_splitter_counts_paragraphs() {
        let splitter = BlankLineSplitter;
        let content = b"rec1 line1\nrec1 line2\n\nrec2 line1\n\nrec3 line1\n";
        assert_eq!(splitter.record_count(content), 3);
    }
}
