use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Counting latch: work is added before it starts and counted down as it
/// completes; waiters block until the count reaches zero.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, n: usize) {
        *self.lock() += n;
    }

    /// Signal one completion. Extra signals past zero are ignored.
    pub fn count_down(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Block until every added unit has completed.
    pub fn wait(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self.zero.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `true` if the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .zero
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }
}
