//! Command-line host for the Cinder bytecode VM.
//!
//! The shell runs script and bytecode files either sequentially on one
//! core or across a bounded pool of worker threads sharing reusable,
//! heap-owning cores (the `scheduler` module).

pub mod config;
pub mod core;
pub mod error;
pub mod heap;
pub mod logging;
pub mod monitor;
pub mod repl;
pub mod scheduler;
pub mod vm;

pub use config::{parse_workers, HeapConfig, OutcomePolicy, ShellConfig};
pub use crate::core::ShellCore;
pub use error::{ShellError, ShellResult};
pub use heap::{Heap, HeapScope, HeapStats};
pub use monitor::Monitor;
pub use scheduler::{run_multiworker, RunReport, TaskOutcome};
