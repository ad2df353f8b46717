use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use cindershell::{
    config::{parse_workers, OutcomePolicy, ShellConfig},
    logging, repl,
    scheduler::{run_multiworker, RunReport},
};

#[derive(Parser, Debug)]
#[command(name = "cindershell", about = "Cinder VM shell")]
struct Args {
    /// Script (.cna) or bytecode (.cnb) files to execute, in order.
    files: Vec<PathBuf>,

    /// Cores, threads and optional repeats: C,T[,R] with C >= T >= 1.
    #[arg(short = 'w', long = "workers", value_name = "C,T[,R]")]
    workers: Option<String>,

    /// Start the interactive prompt (single worker on one thread only).
    #[arg(long)]
    repl: bool,

    /// Write log output to a file named after the first input file.
    #[arg(long)]
    log: bool,

    /// Verbose scheduling and VM logging.
    #[arg(long)]
    verbose: bool,

    /// Trace VM execution instruction by instruction.
    #[arg(long)]
    trace: bool,

    /// Live bytes that trigger a heap collection.
    #[arg(long, value_name = "BYTES")]
    gc_threshold: Option<usize>,

    /// Collect per-task exit codes instead of discarding them.
    #[arg(long)]
    collect_failures: bool,

    /// Print a JSON run summary to stdout when the run completes.
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let (num_workers, num_threads, repeats) = match args.workers.as_deref() {
        Some(value) => parse_workers(value)?,
        None => (1, 1, 1),
    };

    if args.files.is_empty() && !args.repl {
        bail!("you must provide input files or --repl");
    }
    if args.repl && (num_threads > 1 || num_workers > 1) {
        bail!("the repl requires exactly one worker on one thread");
    }

    let mut config = ShellConfig {
        files: args.files,
        num_workers,
        num_threads,
        repeats,
        trace: args.trace,
        ..Default::default()
    };
    if let Some(threshold) = args.gc_threshold {
        config.heap.collection_threshold = threshold;
    }
    if args.collect_failures {
        config.policy = OutcomePolicy::Collect;
    }

    let log_to = if args.log {
        config.files.first().map(|f| logging::log_file_name(f))
    } else {
        None
    };
    logging::init(log_to.as_deref(), args.verbose || args.trace)?;

    if args.repl {
        repl::repl(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let report = if config.num_threads == 1 && config.num_workers == 1 {
        repl::run_single(&config)?
    } else {
        run_multiworker(&config)?
    };

    if args.summary {
        print_summary(&report)?;
    }
    for outcome in report.failures() {
        eprintln!(
            "{}: exit code {} (core {})",
            outcome.task.display(),
            outcome.exit_code,
            outcome.core_id
        );
    }

    // Per-task exit codes do not affect the process status.
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &RunReport) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(report).context("failed to render run summary")?;
    println!("{rendered}");
    Ok(())
}
