//! Declarative per-argument I/O schema: role, location, splitter, joiner,
//! and special flags for each stream a command reads or writes.
//!
//! Grounded on `original_source/psubprocess/streams.py`'s `STDIN`/`STDOUT`/
//! `STDERR` constants and the shape of the per-parameter dicts that
//! `get_streams_from_cmd` consumes.

use serde::{Deserialize, Serialize};

/// Whether a stream is consumed (`Input`) or produced (`Output`) by the
/// wrapped command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Input,
    Output,
}

/// Where in the concrete argv (or among the standard streams) a parameter's
/// value lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamLocation {
    Stdin,
    Stdout,
    Stderr,
    /// Negative indices count from the end of argv, as in
    /// `streams.py::_positive_int`.
    ArgvPositional(i64),
    /// Any of these option strings marks the binding's position.
    ArgvNamed(Vec<String>),
}

/// The `copy` vs. `empty` passthrough variants from spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughKind {
    /// Write an identical copy of the source into every workspace.
    Copy,
    /// Produce only a placeholder path per workspace (for outputs).
    Empty,
}

/// How an input stream is divided into per-shard files, or how an output
/// stream's per-shard placeholders are produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterSpec {
    /// Record boundary is any line containing (or matching, if the pattern
    /// contains regex metacharacters) this pattern.
    Regex(String),
    /// Named record format, resolved against the splitter registry (e.g.
    /// `"blank-line"`).
    Kind(String),
    Passthrough(PassthroughKind),
    /// A caller-registered tag, resolved at registry lookup time rather
    /// than at schema-definition time (schemas are plain data, so they
    /// cannot carry a function pointer directly).
    Custom(String),
}

/// How an output stream's per-shard files are recombined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinerSpec {
    #[default]
    Concat,
    Named(String),
}

/// Flags that change how a binding participates in splitting and transfer,
/// modeled as a small struct of named bools rather than a set, since the
/// set of special behaviors is small and fixed (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SpecialFlag {
    /// The input travels to every shard unsplit (`Passthrough(Copy)`).
    pub no_split: bool,
    /// The batch runner must not include this file in its transfer list.
    pub no_transfer: bool,
    /// The binding is advisory only; its absence from argv is not an error.
    pub no_support: bool,
}

/// One entry of a user-supplied schema: how a single argv parameter (or
/// standard stream) participates in sharding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDef {
    pub location: StreamLocation,
    pub role: StreamRole,
    #[serde(default)]
    pub splitter: Option<SplitterSpec>,
    #[serde(default)]
    pub joiner: Option<JoinerSpec>,
    #[serde(default)]
    pub special: SpecialFlag,
}

impl ParamDef {
    pub fn new(location: StreamLocation, role: StreamRole) -> Self {
        ParamDef {
            location,
            role,
            splitter: None,
            joiner: None,
            special: SpecialFlag::default(),
        }
    }

    pub fn with_splitter(mut self, splitter: SplitterSpec) -> Self {
        self.splitter = Some(splitter);
        self
    }

    pub fn with_joiner(mut self, joiner: JoinerSpec) -> Self {
        self.joiner = Some(joiner);
        self
    }

    pub fn with_special(mut self, special: SpecialFlag) -> Self {
        self.special = special;
        self
    }

    /// A binding must declare a splitter unless it is an Input marked
    /// `no_split` (spec.md §3: "Splitter is required for every Input
    /// binding that is not `NoSplit`").
    pub fn requires_splitter(&self) -> bool {
        self.role == StreamRole::Input && !self.special.no_split
    }
}

/// An ordered sequence of [`ParamDef`]s; the schema's order controls the
/// order splitting is attempted in (spec.md §4.8: splittable inputs first,
/// so K settles before passthrough inputs are replicated).
pub type StreamSchema = Vec<ParamDef>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_without_no_split_requires_a_splitter() {
        let def = ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input);
        assert!(def.requires_splitter());
    }

    #[test]
    fn no_split_input_does_not_require_a_splitter() {
        let def = ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
            .with_special(SpecialFlag { no_split: true, ..Default::default() });
        assert!(!def.requires_splitter());
    }

    #[test]
    fn schema_round_trips_through_json() {
        let schema: StreamSchema = vec![
            ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
                .with_splitter(SplitterSpec::Regex(String::new())),
            ParamDef::new(StreamLocation::ArgvPositional(-1), StreamRole::Output),
        ];
        let json = serde_json::to_string(&schema).unwrap();
        let back: StreamSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
