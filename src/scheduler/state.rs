use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::OutcomePolicy;
use crate::core::ShellCore;
use crate::monitor::Monitor;

use super::worker::WorkerHandle;

/// The result of one executed task. Only produced under
/// `OutcomePolicy::Collect`; the historical default discards exit codes.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: PathBuf,
    pub core_id: usize,
    pub worker_id: usize,
    pub exit_code: i32,
}

/// Everything guarded by the shared scheduler monitor: both FIFO free
/// lists, the free-thread counter and the outcome side channel.
#[derive(Debug, Default)]
pub(crate) struct FreeLists {
    pub free_threads: VecDeque<Arc<WorkerHandle>>,
    pub free_cores: VecDeque<ShellCore>,
    pub free_thread_count: usize,
    pub outcomes: Vec<TaskOutcome>,
}

/// Shared scheduler state. The single shared monitor is the sole guard
/// for the free lists and the counter; FIFO order gives fair round-robin
/// reuse of both threads and cores.
#[derive(Debug)]
pub struct SchedulerState {
    pub(crate) monitor: Monitor<FreeLists>,
    num_threads: usize,
    policy: OutcomePolicy,
}

impl SchedulerState {
    pub fn new(num_threads: usize, policy: OutcomePolicy) -> Self {
        Self {
            monitor: Monitor::new(FreeLists::default()),
            num_threads,
            policy,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub(crate) fn collects_outcomes(&self) -> bool {
        self.policy == OutcomePolicy::Collect
    }

    /// Re-registers a worker as free, returning its carried core (if any)
    /// and the previous task's outcome in the same critical section. A
    /// core never appears on the free list while its thread is still
    /// claimed.
    pub(crate) fn free_self(
        &self,
        thread: Arc<WorkerHandle>,
        core: Option<ShellCore>,
        outcome: Option<TaskOutcome>,
    ) {
        let mut lists = self.monitor.lock();
        lists.free_threads.push_back(thread);
        if let Some(core) = core {
            lists.free_cores.push_back(core);
        }
        if let Some(outcome) = outcome {
            lists.outcomes.push(outcome);
        }
        lists.free_thread_count += 1;
        debug_assert_eq!(lists.free_thread_count, lists.free_threads.len());
        self.monitor.notify_all();
    }

    /// Dequeues the heads of both free lists. The caller must hold the
    /// shared monitor's guard; `None` means no pair is currently free.
    pub(crate) fn try_acquire_pair(
        lists: &mut FreeLists,
    ) -> Option<(Arc<WorkerHandle>, ShellCore)> {
        if lists.free_threads.is_empty() || lists.free_cores.is_empty() {
            return None;
        }
        let thread = lists.free_threads.pop_front()?;
        let core = lists.free_cores.pop_front()?;
        lists.free_thread_count -= 1;
        debug_assert_eq!(lists.free_thread_count, lists.free_threads.len());
        Some((thread, core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;

    fn core(id: usize) -> ShellCore {
        ShellCore::create(&ShellConfig::default(), id).expect("core")
    }

    #[test]
    fn pair_requires_both_lists_nonempty() {
        let state = SchedulerState::new(1, OutcomePolicy::FireAndForget);
        state.free_self(Arc::new(WorkerHandle::new(0)), None, None);
        {
            let mut lists = state.monitor.lock();
            assert!(SchedulerState::try_acquire_pair(&mut lists).is_none());
        }
        {
            let mut lists = state.monitor.lock();
            lists.free_cores.push_back(core(0));
        }
        let mut lists = state.monitor.lock();
        let (thread, acquired) =
            SchedulerState::try_acquire_pair(&mut lists).expect("pair available");
        assert_eq!(thread.id(), 0);
        assert_eq!(acquired.id(), 0);
        assert_eq!(lists.free_thread_count, 0);
    }

    #[test]
    fn free_lists_are_fifo() {
        let state = SchedulerState::new(2, OutcomePolicy::FireAndForget);
        state.free_self(Arc::new(WorkerHandle::new(7)), Some(core(10)), None);
        state.free_self(Arc::new(WorkerHandle::new(8)), Some(core(11)), None);

        let mut lists = state.monitor.lock();
        let (first_thread, first_core) =
            SchedulerState::try_acquire_pair(&mut lists).expect("first pair");
        assert_eq!(first_thread.id(), 7);
        assert_eq!(first_core.id(), 10);
        let (second_thread, second_core) =
            SchedulerState::try_acquire_pair(&mut lists).expect("second pair");
        assert_eq!(second_thread.id(), 8);
        assert_eq!(second_core.id(), 11);
    }

    #[test]
    fn outcome_rides_the_same_critical_section() {
        let state = SchedulerState::new(1, OutcomePolicy::Collect);
        let outcome = TaskOutcome {
            task: "a.cna".into(),
            core_id: 0,
            worker_id: 0,
            exit_code: 3,
        };
        state.free_self(Arc::new(WorkerHandle::new(0)), Some(core(0)), Some(outcome));
        let lists = state.monitor.lock();
        assert_eq!(lists.outcomes.len(), 1);
        assert_eq!(lists.outcomes[0].exit_code, 3);
        assert_eq!(lists.free_cores.len(), 1);
        assert_eq!(lists.free_thread_count, 1);
    }
}
