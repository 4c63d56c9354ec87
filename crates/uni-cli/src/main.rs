//! Command-line front end: loads a postcard-serialized AST and runs it.
//!
//! This crate owns no lexer or parser — producing the `uni::Node` tree from
//! source text is an external collaborator's job (spec §1). What we accept on
//! disk is the tree itself, postcard-encoded, which is also the format a
//! parser front end would hand this binary in a real pipeline.

use std::{fs, path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use uni::{EvalConfig, LimitedTracker, Node, NoLimitTracker, ResourceLimits, Runner, StderrTracer};

/// Runs a postcard-encoded Uni program tree.
#[derive(Parser, Debug)]
#[command(name = "uni", version, about)]
struct Cli {
    /// Path to a postcard-serialized `uni::Node` program tree.
    program: PathBuf,

    /// Wall-clock budget for the whole run, in milliseconds.
    #[arg(long)]
    max_duration_ms: Option<u64>,

    /// Ceiling on live allocation bytes tracked by the evaluator.
    #[arg(long)]
    max_memory: Option<usize>,

    /// Ceiling on evaluator recursion depth.
    #[arg(long)]
    max_recursion_depth: Option<usize>,

    /// Print each evaluation step to stderr as it happens.
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let program = match load_program(&cli.program) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("error reading {}: {err}", cli.program.display());
            return ExitCode::FAILURE;
        }
    };

    let config = build_config(&cli);
    let runner = Runner::with_config(config);

    let start = Instant::now();
    match runner.run(&program) {
        Ok(value) => {
            let elapsed = start.elapsed();
            println!("{value}");
            eprintln!("completed in {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_program(path: &PathBuf) -> Result<Node, String> {
    let bytes = fs::read(path).map_err(|err| err.to_string())?;
    postcard::from_bytes(&bytes).map_err(|err| err.to_string())
}

fn build_config(cli: &Cli) -> EvalConfig {
    let has_limits = cli.max_duration_ms.is_some() || cli.max_memory.is_some() || cli.max_recursion_depth.is_some();

    let mut limits = ResourceLimits::new();
    if let Some(ms) = cli.max_duration_ms {
        limits = limits.max_duration(std::time::Duration::from_millis(ms));
    }
    if let Some(bytes) = cli.max_memory {
        limits = limits.max_memory(bytes);
    }
    if cli.max_recursion_depth.is_some() {
        limits = limits.max_recursion_depth(cli.max_recursion_depth);
    }

    let resource_tracker: Box<dyn uni::ResourceTracker> = if has_limits {
        Box::new(LimitedTracker::new(limits.clone()))
    } else {
        Box::new(NoLimitTracker::with_limits(limits.clone()))
    };
    let tracer: Box<dyn uni::VmTracer> =
        if cli.trace { Box::new(StderrTracer::default()) } else { Box::new(uni::NoopTracer) };

    EvalConfig {
        resource_limits: limits,
        tracer: std::cell::RefCell::new(tracer),
        resource_tracker: std::cell::RefCell::new(resource_tracker),
        ..EvalConfig::default()
    }
}
