use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ShellConfig;
use crate::core::ShellCore;
use crate::error::{ShellError, ShellResult};

use super::state::SchedulerState;
use super::worker::{worker_loop, WorkerHandle};
use super::TaskOutcome;

/// Summary of one multi-worker run. `outcomes` is populated only under
/// `OutcomePolicy::Collect`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub executed: usize,
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.exit_code != 0)
    }
}

struct WorkerRecord {
    handle: Arc<WorkerHandle>,
    join: thread::JoinHandle<()>,
}

/// Drives a whole multi-worker run on the calling thread: startup,
/// dispatch of `files × repeats` tasks, and clean shutdown.
pub fn run_multiworker(config: &ShellConfig) -> ShellResult<RunReport> {
    config.validate()?;
    let state = Arc::new(SchedulerState::new(config.num_threads, config.policy));

    // Start the worker threads first; each registers itself free
    // immediately.
    let mut workers = Vec::with_capacity(config.num_threads);
    for id in 0..config.num_threads {
        match spawn_worker(id, &state) {
            Ok(record) => workers.push(record),
            Err(err) => {
                shutdown(&state, workers)?;
                return Err(err);
            }
        }
    }

    // Create the cores. Any failure is fatal before any work starts; the
    // already-running workers are torn down on the way out.
    let mut cores = Vec::with_capacity(config.num_workers);
    for id in 0..config.num_workers {
        match ShellCore::create(config, id) {
            Ok(core) => cores.push(core),
            Err(err) => {
                drop(cores);
                shutdown(&state, workers)?;
                return Err(err);
            }
        }
    }

    // Seed the free-core list.
    {
        let mut lists = state.monitor.lock();
        lists.free_cores.extend(cores.drain(..));
    }

    let total = config.files.len() * config.repeats;
    info!(
        threads = config.num_threads,
        cores = config.num_workers,
        files = config.files.len(),
        repeats = config.repeats,
        total,
        "multi-worker dispatch starting"
    );

    if total > 0 {
        dispatch(config, &state);
    }

    shutdown(&state, workers)?;

    // Every core is back on the free list; dropping it tears down the
    // runtime first, then the heap.
    let outcomes = {
        let mut lists = state.monitor.lock();
        debug_assert_eq!(lists.free_cores.len(), config.num_workers);
        lists.free_cores.clear();
        std::mem::take(&mut lists.outcomes)
    };

    info!(executed = total, "multi-worker dispatch finished");
    Ok(RunReport {
        executed: total,
        outcomes,
    })
}

fn spawn_worker(id: usize, state: &Arc<SchedulerState>) -> ShellResult<WorkerRecord> {
    let handle = Arc::new(WorkerHandle::new(id));
    let join = thread::Builder::new()
        .name(format!("cinder-worker-{id}"))
        .spawn({
            let handle = Arc::clone(&handle);
            let state = Arc::clone(state);
            move || worker_loop(handle, state)
        })
        .map_err(|source| ShellError::Spawn { id, source })?;
    Ok(WorkerRecord { handle, join })
}

/// The dispatch cursor walks the file list `repeats` times, pairing each
/// task with a free (thread, core) pair and blocking only when none is
/// free. Within one pass files go out in list order; completion order is
/// up to the workers.
fn dispatch(config: &ShellConfig, state: &SchedulerState) {
    let mut repeats_done = 0usize;
    let mut file_index = 0usize;
    let mut finished = false;

    let mut lists = state.monitor.lock();
    while !finished {
        while let Some((thread, core)) = SchedulerState::try_acquire_pair(&mut lists) {
            let task = config.files[file_index].clone();
            debug!(
                worker = thread.id(),
                core = core.id(),
                task = %task.display(),
                pass = repeats_done,
                "scheduling"
            );
            thread.start_work(Some((core, task)));
            file_index += 1;
            if file_index == config.files.len() {
                file_index = 0;
                repeats_done += 1;
                if repeats_done == config.repeats {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            break;
        }
        state.monitor.wait(&mut lists);
    }
}

/// Waits until no task is in flight, feeds every worker the termination
/// signal, then joins each OS thread.
fn shutdown(state: &SchedulerState, workers: Vec<WorkerRecord>) -> ShellResult<()> {
    {
        let mut lists = state.monitor.lock();
        while lists.free_thread_count < workers.len() {
            state.monitor.wait(&mut lists);
        }
        for worker in &workers {
            worker.handle.start_work(None);
        }
    }
    for worker in workers {
        let id = worker.handle.id();
        worker
            .join
            .join()
            .map_err(|_| ShellError::WorkerPanicked { id })?;
        debug!(worker = id, "joined");
    }
    Ok(())
}
