//! Fixed-size worker pool fed by one shared FIFO queue.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::latch::CompletionLatch;

/// Identifier handed back by `submit`, echoed in the matching [`Completion`].
pub type TaskId = u64;

/// Worker count sized to the machine, never below two.
pub fn default_worker_count() -> usize {
    num_cpus::get().max(2)
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool has been shut down")]
    ShutDown,
    #[error("pending task queue is full")]
    QueueFull,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A task that could not be queued, returned to the caller.
#[derive(Debug)]
pub struct Rejected<T> {
    pub reason: PoolError,
    pub task: T,
}

/// Panic message captured from a task handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPanic(pub String);

/// Exactly one of these is delivered per accepted task.
#[derive(Debug)]
pub struct Completion<R> {
    pub task_id: TaskId,
    pub result: Result<R, WorkerPanic>,
}

struct Job<T> {
    id: TaskId,
    payload: T,
}

/// Runs `handler` over submitted tasks on `worker_count` threads.
///
/// Each worker pulls one task at a time from a bounded FIFO queue and sends
/// its completion back over an unbounded channel, drained by the owner.
pub struct WorkerPool<T, R> {
    task_sender: Option<Sender<Job<T>>>,
    result_receiver: Receiver<Completion<R>>,
    worker_handles: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    pending: Arc<CompletionLatch>,
    terminated: Arc<AtomicBool>,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `worker_count` named threads (at least one) behind a queue of
    /// `queue_capacity` pending tasks.
    pub fn new<F>(
        name: &str,
        worker_count: usize,
        queue_capacity: usize,
        handler: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let (task_tx, task_rx) = crossbeam_channel::bounded::<Job<T>>(queue_capacity.max(1));
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let handler = Arc::new(handler);
        let pending = Arc::new(CompletionLatch::new());
        let terminated = Arc::new(AtomicBool::new(false));

        let mut pool = Self {
            task_sender: Some(task_tx),
            result_receiver: result_rx,
            worker_handles: Vec::with_capacity(worker_count.max(1)),
            next_id: AtomicU64::new(0),
            pending: Arc::clone(&pending),
            terminated: Arc::clone(&terminated),
        };

        for i in 0..worker_count.max(1) {
            let rx = task_rx.clone();
            let tx: Sender<Completion<R>> = result_tx.clone();
            let handler = Arc::clone(&handler);
            let pending = Arc::clone(&pending);
            let terminated = Arc::clone(&terminated);

            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if terminated.load(Ordering::Acquire) {
                            pending.count_down();
                            continue;
                        }
                        let result = catch_unwind(AssertUnwindSafe(|| handler(job.payload)))
                            .map_err(|payload| WorkerPanic(panic_message(payload)));
                        if !terminated.load(Ordering::Acquire) {
                            let _ = tx.send(Completion {
                                task_id: job.id,
                                result,
                            });
                        }
                        pending.count_down();
                    }
                })?;
            pool.worker_handles.push(handle);
        }

        tracing::debug!(name, workers = pool.worker_handles.len(), "worker pool started");
        Ok(pool)
    }

    fn sender(&self) -> Option<&Sender<Job<T>>> {
        if self.terminated.load(Ordering::Acquire) {
            return None;
        }
        self.task_sender.as_ref()
    }

    /// Queue a task, blocking while the pending queue is full.
    pub fn submit(&self, task: T) -> Result<TaskId, Rejected<T>> {
        let Some(sender) = self.sender() else {
            return Err(Rejected {
                reason: PoolError::ShutDown,
                task,
            });
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.add(1);
        match sender.send(Job { id, payload: task }) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.pending.count_down();
                Err(Rejected {
                    reason: PoolError::ShutDown,
                    task: e.into_inner().payload,
                })
            }
        }
    }

    /// Queue a task without blocking.
    pub fn try_submit(&self, task: T) -> Result<TaskId, Rejected<T>> {
        let Some(sender) = self.sender() else {
            return Err(Rejected {
                reason: PoolError::ShutDown,
                task,
            });
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.add(1);
        match sender.try_send(Job { id, payload: task }) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(job)) => {
                self.pending.count_down();
                Err(Rejected {
                    reason: PoolError::QueueFull,
                    task: job.payload,
                })
            }
            Err(TrySendError::Disconnected(job)) => {
                self.pending.count_down();
                Err(Rejected {
                    reason: PoolError::ShutDown,
                    task: job.payload,
                })
            }
        }
    }

    /// Collect every completion delivered so far without blocking.
    pub fn drain(&self) -> Vec<Completion<R>> {
        self.result_receiver.try_iter().collect()
    }

    /// Block until one completion arrives or `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Completion<R>> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Tasks accepted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pending.count()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Block until every accepted task has delivered its completion.
    pub fn wait_idle(&self) {
        self.pending.wait();
    }

    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        self.pending.wait_timeout(timeout)
    }

    /// Let queued work finish, then stop and join every worker.
    pub fn shutdown(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Stop accepting work and discard queued and in-flight results.
    ///
    /// Workers finishing a task drop its result; the threads are detached.
    pub fn terminate(&mut self) {
        self.terminated.store(true, Ordering::Release);
        self.task_sender.take();
        self.worker_handles.clear();
        while self.result_receiver.try_recv().is_ok() {}
    }
}

impl<T, R> Drop for WorkerPool<T, R> {
    fn drop(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
