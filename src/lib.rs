//! Parallelizes a non-parallel, record-oriented command-line program by
//! sharding its input files, running one subprocess per shard — locally or
//! on a batch cluster — and joining the shard outputs back together.
//!
//! The entry point is [`Dispatcher`]: construct one against a command's
//! argv and a [`StreamSchema`], then `wait` on it for an aggregate exit
//! code. Everything upstream of the dispatcher — binding a schema to a
//! concrete argv, splitting and joining streams, and running one shard's
//! process — is exposed as its own module so alternate splitters, joiners,
//! and runners can be registered without touching the dispatcher itself.
//!
//! # Examples
//!
//! ```ignore
//! let schema: StreamSchema = vec![
//!     ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
//!         .with_splitter(SplitterSpec::Regex(">".into())),
//! ];
//! let mut dispatcher = Dispatcher::construct(
//!     &["grep".into(), "-i".into(), "/tmp/in.fasta".into()],
//!     &schema,
//!     CallerStdio::default(),
//!     &LocalRunner::new(),
//!     &SplitterRegistry::new(),
//!     JoinerRegistry::new(),
//!     DispatcherConfig::default(),
//! )?;
//! let code = dispatcher.wait()?;
//! ```

#![warn(missing_docs)]

extern crate libc;

pub mod binder;
pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod joiner;
pub mod process;
pub mod runner;
pub mod schema;
pub mod splitter;
pub mod workspace;

pub use binder::{bind_streams, parse_inline_schema, CallerStdio, FileRef, ResolvedLocation, StreamBinding};
pub use cli::{
    install_signal_handlers, load_schema, register_dispatcher, report_and_exit_code, split_command,
    CommonArgs, CondorArgs, DispatcherHandle, ParallelArgs, RunnerKindArg,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherState};
pub use error::{Error, Result};
pub use joiner::{default_joiner, ConcatJoiner, Joiner, JoinerRegistry};
pub use process::{run, spawn, Output, Redirection};
pub use runner::batch::{BatchRunner, BatchRunnerConfig};
pub use runner::local::LocalRunner;
pub use runner::{JobState, Runner, ShardHandle, ShardJob};
pub use schema::{
    JoinerSpec, ParamDef, PassthroughKind, SpecialFlag, SplitterSpec, StreamLocation, StreamRole,
    StreamSchema,
};
pub use splitter::{BlankLineSplitter, PassthroughSplitter, RegexSplitter, Splitter, SplitterRegistry};
pub use workspace::ShardWorkspace;
