use std::io::{self, BufRead, Write};
use std::time::Instant;

use tracing::info;

use crate::config::{OutcomePolicy, ShellConfig};
use crate::core::ShellCore;
use crate::error::ShellResult;
use crate::scheduler::{RunReport, TaskOutcome};
use crate::vm::interp::value_to_string;

/// Sequential single-worker mode: one core serves every task in list
/// order, `repeats` passes. No threads are spawned.
pub fn run_single(config: &ShellConfig) -> ShellResult<RunReport> {
    config.validate()?;
    let mut core = ShellCore::create(config, 0)?;
    let mut outcomes = Vec::new();
    let mut executed = 0usize;
    for pass in 0..config.repeats {
        for task in &config.files {
            let exit_code = core.run(task);
            executed += 1;
            info!(task = %task.display(), pass, exit_code, "task finished");
            if config.policy == OutcomePolicy::Collect {
                outcomes.push(TaskOutcome {
                    task: task.clone(),
                    core_id: core.id(),
                    worker_id: 0,
                    exit_code,
                });
            }
        }
    }
    Ok(RunReport { executed, outcomes })
}

const HELP: &str = "\
Text entered at the prompt is assembled and evaluated unless it is one\n\
of these commands:\n\n\
  ?             print help\n\
  .input        collect lines until a line that reads '.end', then\n\
                evaluate the collected lines\n\
  .load file    run the file (assembly or bytecode)\n\
  .quit         leave the repl\n\
  .time expr    evaluate the rest of the line and report the time it\n\
                took\n";

/// One parsed prompt line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Quit,
    Load(&'a str),
    Input,
    Time(&'a str),
    Eval(&'a str),
}

fn command_rest<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        // `.timer` is not `.time r`.
        None
    }
}

fn parse_command(trimmed: &str) -> Command<'_> {
    if trimmed == "?" {
        return Command::Help;
    }
    if trimmed == ".quit" {
        return Command::Quit;
    }
    if trimmed == ".input" {
        return Command::Input;
    }
    if let Some(rest) = command_rest(trimmed, ".load") {
        return Command::Load(rest);
    }
    if let Some(rest) = command_rest(trimmed, ".time") {
        return Command::Time(rest);
    }
    Command::Eval(trimmed)
}

/// Interactive prompt on one core. Requires exactly one worker on one
/// thread; multi-worker mode rejects it up front.
pub fn repl(config: &ShellConfig) -> ShellResult<()> {
    let mut core = ShellCore::create(config, 0)?;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("cinder interactive shell");
    println!("Type '?' for help\n");

    loop {
        print!("cinder> ");
        let _ = io::stdout().flush();
        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = match line {
            Ok(line) => line,
            Err(_) => return Ok(()),
        };
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let (source, record_time) = match parse_command(trimmed) {
            Command::Help => {
                print!("{HELP}");
                continue;
            }
            Command::Quit => return Ok(()),
            Command::Load(path) => {
                if path.is_empty() {
                    println!("usage: .load <file>");
                    continue;
                }
                let exit_code = core.run(std::path::Path::new(path));
                println!("exit code {exit_code}");
                continue;
            }
            Command::Input => {
                let mut collected = String::new();
                loop {
                    let Some(next) = lines.next() else {
                        return Ok(());
                    };
                    let next = match next {
                        Ok(next) => next,
                        Err(_) => return Ok(()),
                    };
                    if next.trim() == ".end" {
                        break;
                    }
                    collected.push_str(&next);
                    collected.push('\n');
                }
                (collected, false)
            }
            Command::Time(expr) => {
                if expr.is_empty() {
                    println!("usage: .time <expr>");
                    continue;
                }
                (expr.to_string(), true)
            }
            Command::Eval(source) => (source.to_string(), false),
        };

        let started = Instant::now();
        match core.eval_source(&source) {
            Ok(value) => {
                println!("{}", value_to_string(&value));
                if record_time {
                    println!("elapsed: {:?}", started.elapsed());
                }
            }
            Err(err) => println!("error: {err}"),
        }
    }
}
