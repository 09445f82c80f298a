//! `run-with-condor` — same surface as `run-in-parallel`, minus `-r`: the
//! runner is always the batch runner, and `-l` names its log file.
//!
//! Grounded on `original_source/scripts/run_with_condor.py`.

use std::fs::File;
use std::sync::{Arc, Mutex};

use clap::Parser;

use parashard::{
    cli, BatchRunner, BatchRunnerConfig, CallerStdio, CondorArgs, Dispatcher, DispatcherConfig,
    JoinerRegistry, SplitterRegistry,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CondorArgs::parse();
    std::process::exit(run(args));
}

fn run(args: CondorArgs) -> i32 {
    cli::install_signal_handlers();

    let raw = cli::split_command(&args.common.command);
    let (argv, inline_schema) = match parashard::parse_inline_schema(&raw) {
        Ok(parsed) => parsed,
        Err(e) => return cli::report_and_exit_code(&e),
    };

    let mut schema = inline_schema;
    if let Some(d) = &args.common.schema {
        match cli::load_schema(d) {
            Ok(loaded) => schema.extend(loaded),
            Err(e) => return cli::report_and_exit_code(&e),
        }
    }

    let stdio = match build_stdio(&args) {
        Ok(stdio) => stdio,
        Err(e) => return cli::report_and_exit_code(&e),
    };

    let runner = BatchRunner::new(BatchRunnerConfig {
        log_path: args.log.clone(),
        requirements: args.common.requirements.clone(),
        ..Default::default()
    });

    let dispatcher = Dispatcher::construct(
        &argv,
        &schema,
        stdio,
        &runner,
        &SplitterRegistry::new(),
        JoinerRegistry::new(),
        DispatcherConfig {
            requested_splits: args.common.splits,
            workspace_parent: None,
        },
    );
    let dispatcher = match dispatcher {
        Ok(d) => d,
        Err(e) => return cli::report_and_exit_code(&e),
    };

    let handle = Arc::new(Mutex::new(dispatcher));
    cli::register_dispatcher(handle.clone() as Arc<Mutex<dyn cli::DispatcherHandle>>);

    let code = handle.lock().unwrap().wait();
    match code {
        Ok(code) => code,
        Err(e) => cli::report_and_exit_code(&e),
    }
}

fn build_stdio(args: &CondorArgs) -> parashard::Result<CallerStdio> {
    Ok(CallerStdio {
        stdin: args.common.stdin.as_ref().map(File::open).transpose()?,
        stdout: args.common.stdout.as_ref().map(File::create).transpose()?,
        stderr: args.common.stderr.as_ref().map(File::create).transpose()?,
    })
}
