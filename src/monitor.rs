use parking_lot::{Condvar, Mutex, MutexGuard};

/// A mutex paired with a condition variable, the classic wait/notify
/// monitor.
///
/// `wait` releases the lock, suspends the caller until notified and
/// reacquires the lock before returning. Wakeups may be spurious; callers
/// must loop on the condition they are waiting for. The awaited flag, not
/// the notification, is the source of truth.
#[derive(Debug, Default)]
pub struct Monitor<T> {
    state: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            condvar: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Must be called with a guard obtained from this monitor's `lock`.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Wakes one waiter. Used on a worker's private monitor, where there
    /// is a single eligible waiter.
    pub fn notify_one(&self) {
        self.condvar.notify_one();
    }

    /// Wakes every waiter. Used on the shared scheduler monitor, where
    /// more than one party may be eligible.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }
}
