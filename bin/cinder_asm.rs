//! Assemble a Cinder textual assembly file into bytecode.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cindershell::vm::assemble;

#[derive(Parser, Debug)]
#[command(name = "cinder-asm", about = "Cinder assembler")]
struct Args {
    /// Input .cna assembly file.
    input: PathBuf,
    /// Output .cnb bytecode file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let program = assemble(&source)?;
    let bytes = program.to_bytes()?;
    fs::write(&args.output, bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!(
        "assembled {} -> {} ({} functions, {} constants)",
        args.input.display(),
        args.output.display(),
        program.functions.len(),
        program.constants.len()
    );
    Ok(())
}
