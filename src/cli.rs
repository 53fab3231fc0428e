//! CLI surface (component J). A thin `clap`-derived adapter: parse flags,
//! load configuration if needed, call into the library, format the result
//! for the terminal, and set the process exit code (§6).

use crate::config;
use crate::diversion::{default_breadcrumb_path, DiversionController};
use crate::expander;
use crate::modifications::Registry;
use crate::runtime::{RawSocketInjector, TestRuntime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "divertsuite", about = "Declarative packet-mangling test suites")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Cmd,

    /// Suite-wide RNG seed; per-test seeds are derived from it (§5).
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// First test index to run (inclusive).
    #[arg(long, global = true)]
    pub from: Option<usize>,

    /// Last test index to run (exclusive).
    #[arg(long, global = true)]
    pub to: Option<usize>,

    /// Expand and print the test plan without installing any rule or
    /// running any command.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Prints every discovered modification name.
    List,
    /// Prints the usage string of one modification.
    Usage { modification: String },
    /// Validates a configuration file without executing it.
    Checkconfig { file: PathBuf },
    /// Runs the full suite described by a configuration file.
    Start { file: PathBuf },
}

/// Runs the parsed command, returning the process exit code.
pub fn run(cli: Cli) -> i32 {
    match cli.command {
        Cmd::List => {
            let registry = Registry::with_builtins();
            for name in registry.list() {
                println!("{name}");
            }
            0
        }
        Cmd::Usage { modification } => {
            let registry = Registry::with_builtins();
            match registry.usage(&modification) {
                Ok(usage) => {
                    println!("{usage}");
                    0
                }
                Err(e) => {
                    eprintln!("{e}");
                    1
                }
            }
        }
        Cmd::Checkconfig { file } => run_checkconfig(&file),
        Cmd::Start { file } => run_start(&file, &cli),
    }
}

fn run_checkconfig(file: &PathBuf) -> i32 {
    let registry = Registry::with_builtins();
    match config::load_file(file).map_err(Into::into).and_then(|raw| {
        let (input, output) = config::validate(&raw, &registry)?;
        let tests = expander::expand(&input, &output)?;
        Ok::<_, crate::errors::SuiteError>(tests.len())
    }) {
        Ok(count) => {
            println!("ok: {count} test(s)");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

fn run_start(file: &PathBuf, cli: &Cli) -> i32 {
    let registry = Registry::with_builtins();
    let raw = match config::load_file(file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let (input, output) = match config::validate(&raw, &registry) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let tests = match expander::expand(&input, &output) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let from = cli.from.unwrap_or(0);
    let to = cli.to.unwrap_or(tests.len());
    let seed = cli.seed.unwrap_or(0);

    if cli.dry_run {
        for test in tests.iter().filter(|t| t.index >= from && t.index < to) {
            println!("test {}: input={:?} output={:?}", test.index, describe_args(&test.input_args), describe_args(&test.output_args));
        }
        return 0;
    }

    let controller = match DiversionController::new(default_breadcrumb_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to initialize diversion controller: {e}");
            return 1;
        }
    };
    if let Err(e) = controller.sweep_stale_rules() {
        log::warn!("stale-rule sweep failed: {e}");
    }

    let injector = match RawSocketInjector::new() {
        Ok(i) => Arc::new(i),
        Err(e) => {
            eprintln!("failed to open raw injector sockets: {e}");
            return 1;
        }
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        let _ = ctrlc::set_handler(move || {
            cancelled.store(true, Ordering::SeqCst);
        });
    }

    let mut aggregator = crate::aggregator::ResultAggregator::new();
    for test in tests.iter().filter(|t| t.index >= from && t.index < to) {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        // `validate()` already bound every concrete argument tuple against
        // each modification's `parse_args`, so reaching an `ArgumentError`
        // or `UnknownModification` here is an invariant violation, not a
        // per-test condition (§7 scopes both suite-fatal, abort pre-run).
        // Abort the remaining suite rather than silently skipping the test.
        let (input_pipeline, output_pipeline) = match expander::build_pipelines(&registry, &input, &output, test) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("test {}: {e}; aborting remaining tests", test.index);
                break;
            }
        };
        let runtime = TestRuntime {
            queue_num: raw.nfrules.first().map(|r| r.qnum as u16).unwrap_or(0),
            cancelled: cancelled.clone(),
            breadcrumb_path: default_breadcrumb_path(),
        };
        let result = runtime.run_test(
            test.index,
            seed,
            &raw.nfrules,
            input_pipeline,
            output_pipeline,
            &raw.cmd,
            injector.clone(),
        );
        if cli.verbose {
            println!("test {}: {:?} ({:?})", result.index, result.outcome, result.notes);
        }
        aggregator.record(result);
    }

    let summary = aggregator.summary();
    println!(
        "passed={} failed={} setup_error={} cancelled={}",
        summary.passed, summary.failed, summary.setup_error, summary.cancelled
    );
    if cli.verbose {
        println!("failing tests: {:?}", aggregator.failing_indices());
    }
    if summary.all_passed() {
        0
    } else {
        1
    }
}

fn describe_args(args: &[Vec<crate::atoms::Value>]) -> Vec<Vec<String>> {
    args.iter()
        .map(|values| values.iter().map(|v| v.to_string()).collect())
        .collect()
}
