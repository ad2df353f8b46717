use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::ShellCore;
use crate::monitor::Monitor;

use super::state::{SchedulerState, TaskOutcome};

/// A worker's private mailbox. `pending` is the source of truth: the
/// master may set it and notify before the worker is back inside `wait`,
/// and the flag recheck makes that race harmless.
#[derive(Debug, Default)]
struct Mailbox {
    pending: bool,
    /// `Some` carries the next assignment; `None` with `pending` set is
    /// the termination signal.
    work: Option<(ShellCore, PathBuf)>,
}

/// Handle to one worker thread, shared between the master (through the
/// free lists) and the worker loop itself.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    mailbox: Monitor<Mailbox>,
}

impl WorkerHandle {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            mailbox: Monitor::new(Mailbox::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Assigns work (or termination, for `None`) to this worker. Must
    /// only be called on a worker that is on the free list; the worker
    /// never looks at its mailbox while running.
    pub(crate) fn start_work(&self, work: Option<(ShellCore, PathBuf)>) {
        let mut mailbox = self.mailbox.lock();
        debug_assert!(!mailbox.pending, "start_work on a busy worker");
        mailbox.work = work;
        mailbox.pending = true;
        self.mailbox.notify_one();
    }
}

/// The worker state machine: register free, wait for an assignment, run
/// it (or terminate on the null assignment), repeat.
pub(crate) fn worker_loop(handle: Arc<WorkerHandle>, state: Arc<SchedulerState>) {
    let mut carried: Option<ShellCore> = None;
    let mut outcome: Option<TaskOutcome> = None;
    loop {
        // Registering: the previous task's core and outcome travel back
        // to the shared state in the same critical section.
        state.free_self(Arc::clone(&handle), carried.take(), outcome.take());

        // Waiting: flag recheck loop under the private monitor.
        let work = {
            let mut mailbox = handle.mailbox.lock();
            while !mailbox.pending {
                handle.mailbox.wait(&mut mailbox);
            }
            mailbox.work.take()
        };

        let Some((mut core, task)) = work else {
            debug!(worker = handle.id, "terminating");
            return;
        };

        debug!(worker = handle.id, core = core.id(), task = %task.display(), "task starting");
        let exit_code = core.run(&task);
        debug!(worker = handle.id, core = core.id(), exit_code, "task completed");

        if state.collects_outcomes() {
            outcome = Some(TaskOutcome {
                task,
                core_id: core.id(),
                worker_id: handle.id,
                exit_code,
            });
        }
        carried = Some(core);

        let mut mailbox = handle.mailbox.lock();
        mailbox.pending = false;
    }
}
