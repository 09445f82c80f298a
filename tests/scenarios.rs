//! End-to-end scenarios exercising the real process/runner/dispatcher path
//! (no mocking of `Command`), seeded from spec.md §8's S1–S6.

use std::fs;

use parashard::{
    CallerStdio, Dispatcher, DispatcherConfig, JoinerRegistry, LocalRunner, ParamDef,
    SpecialFlag, SplitterRegistry, SplitterSpec, StreamLocation, StreamRole,
};
use tempfile::{tempdir, NamedTempFile};

fn echo_cat() -> String {
    env!("CARGO_BIN_EXE_echo_cat").to_string()
}

/// S1 — copy through a named input with no explicit shard count request.
#[test]
fn s1_copy_through_named_input() {
    let in_file = NamedTempFile::new().unwrap();
    fs::write(in_file.path(), "hola").unwrap();
    let out_file = NamedTempFile::new().unwrap();

    let argv = vec![
        echo_cat(),
        "-i".to_string(),
        in_file.path().to_string_lossy().into_owned(),
    ];
    let schema = vec![
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
            .with_splitter(SplitterSpec::Regex(String::new())),
        ParamDef::new(StreamLocation::Stdout, StreamRole::Output),
    ];
    let stdio = CallerStdio {
        stdout: Some(out_file.reopen().unwrap()),
        ..Default::default()
    };

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        stdio,
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(1),
            workspace_parent: None,
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 0);
    assert_eq!(fs::read_to_string(out_file.path()).unwrap(), "hola");
}

/// S2 — no splittable input at all; every one of N shards prints the same
/// literal message to stdout and stderr.
#[test]
fn s2_no_input_replicates_literal_output_across_shards() {
    let out_file = NamedTempFile::new().unwrap();
    let err_file = NamedTempFile::new().unwrap();

    let argv = vec![
        echo_cat(),
        "-m".to_string(),
        "hola".to_string(),
        "-f".to_string(),
        "caracola".to_string(),
    ];
    let schema = vec![
        ParamDef::new(StreamLocation::Stdout, StreamRole::Output),
        ParamDef::new(StreamLocation::Stderr, StreamRole::Output),
    ];
    let stdio = CallerStdio {
        stdout: Some(out_file.reopen().unwrap()),
        stderr: Some(err_file.reopen().unwrap()),
        ..Default::default()
    };

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        stdio,
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(4),
            workspace_parent: None,
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 0);
    assert_eq!(fs::read_to_string(out_file.path()).unwrap(), "hola".repeat(4));
    assert_eq!(fs::read_to_string(err_file.path()).unwrap(), "caracola".repeat(4));
}

/// S3 — stdin split on a literal ">" marker; concatenated shard output
/// reproduces the original byte-for-byte.
#[test]
fn s3_stdin_splitter_round_trips_byte_for_byte() {
    let content = ">r1\na\n>r2\nb\n>r3\nc\n>r4\nd\n>r5\ne\n";
    let in_file = NamedTempFile::new().unwrap();
    fs::write(in_file.path(), content).unwrap();
    let out_file = NamedTempFile::new().unwrap();

    let argv = vec![echo_cat()];
    let schema = vec![
        ParamDef::new(StreamLocation::Stdin, StreamRole::Input)
            .with_splitter(SplitterSpec::Regex(">".into())),
        ParamDef::new(StreamLocation::Stdout, StreamRole::Output),
    ];
    let stdio = CallerStdio {
        stdin: Some(fs::File::open(in_file.path()).unwrap()),
        stdout: Some(out_file.reopen().unwrap()),
        ..Default::default()
    };

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        stdio,
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(3),
            workspace_parent: None,
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 0);
    assert_eq!(fs::read_to_string(out_file.path()).unwrap(), content);
}

/// S4 — two independent inputs, two independent outputs; each output
/// reproduces its own input.
#[test]
fn s4_two_inputs_two_outputs_each_round_trip() {
    let lines_a: String = (0..10).map(|n| format!("a{n}\n")).collect();
    let lines_b: String = (0..10).map(|n| format!("b{n}\n")).collect();

    let in_a = NamedTempFile::new().unwrap();
    fs::write(in_a.path(), &lines_a).unwrap();
    let in_b = NamedTempFile::new().unwrap();
    fs::write(in_b.path(), &lines_b).unwrap();
    let out_a = NamedTempFile::new().unwrap();
    let out_b = NamedTempFile::new().unwrap();

    let argv = vec![
        echo_cat(),
        "-i".to_string(),
        in_a.path().to_string_lossy().into_owned(),
        "-x".to_string(),
        in_b.path().to_string_lossy().into_owned(),
        "-o".to_string(),
        out_a.path().to_string_lossy().into_owned(),
        "-z".to_string(),
        out_b.path().to_string_lossy().into_owned(),
    ];
    let schema = vec![
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
            .with_splitter(SplitterSpec::Regex(String::new())),
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-x".into()]), StreamRole::Input)
            .with_splitter(SplitterSpec::Regex(String::new())),
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-o".into()]), StreamRole::Output),
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-z".into()]), StreamRole::Output),
    ];

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        CallerStdio::default(),
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(3),
            workspace_parent: None,
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 0);
    assert_eq!(fs::read_to_string(out_a.path()).unwrap(), lines_a);
    assert_eq!(fs::read_to_string(out_b.path()).unwrap(), lines_b);
}

/// S5 — a `no_split` input is duplicated whole into every shard.
#[test]
fn s5_no_split_input_is_duplicated_across_every_shard() {
    let content = "l1\nl2\n";
    let in_file = NamedTempFile::new().unwrap();
    fs::write(in_file.path(), content).unwrap();
    let out_file = NamedTempFile::new().unwrap();

    let argv = vec![
        echo_cat(),
        "-i".to_string(),
        in_file.path().to_string_lossy().into_owned(),
    ];
    let schema = vec![
        ParamDef::new(StreamLocation::ArgvNamed(vec!["-i".into()]), StreamRole::Input)
            .with_special(SpecialFlag { no_split: true, ..Default::default() }),
        ParamDef::new(StreamLocation::Stdout, StreamRole::Output),
    ];
    let stdio = CallerStdio {
        stdout: Some(out_file.reopen().unwrap()),
        ..Default::default()
    };

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        stdio,
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(4),
            workspace_parent: None,
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 0);
    assert_eq!(fs::read_to_string(out_file.path()).unwrap(), content.repeat(4));
}

/// S6 — every shard's non-zero exit propagates as the dispatcher's
/// aggregate code, and every shard workspace is removed afterward.
#[test]
fn s6_nonzero_exit_propagates_and_workspaces_are_cleaned_up() {
    let workspace_parent = tempdir().unwrap();
    let argv = vec![echo_cat(), "-r".to_string(), "20".to_string()];
    let schema = vec![];

    let runner = LocalRunner::new();
    let mut dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        CallerStdio::default(),
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: Some(3),
            workspace_parent: Some(workspace_parent.path().to_path_buf()),
        },
    )
    .unwrap();

    assert_eq!(dispatcher.wait().unwrap(), 20);
    assert_eq!(fs::read_dir(workspace_parent.path()).unwrap().count(), 0);
}
