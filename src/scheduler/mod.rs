//! Multi-worker task dispatch.
//!
//! W worker threads share C reusable cores (C >= W). The master thread
//! pairs a free thread with a free core, hands the pair one task, and
//! blocks only when no pair is available. Workers rejoin the free lists
//! the moment they finish. One shared monitor guards both free lists;
//! each worker additionally has a private monitor for its own mailbox.

mod master;
mod state;
mod worker;

pub use master::{run_multiworker, RunReport};
pub use state::{SchedulerState, TaskOutcome};
pub use worker::WorkerHandle;
