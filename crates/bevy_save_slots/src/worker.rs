use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use bevy::{
    prelude::*,
    tasks::{IoTaskPool, Task, TaskPool, block_on},
};
use thiserror::Error;

/// Errors reported by a work item instead of its result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The token was cancelled before the item started.
    #[error("Work item was cancelled before it ran")]
    Cancelled,

    /// The item panicked. Holds the panic message.
    #[error("Work item panicked: {0}")]
    Panicked(String),
}

/// Shared flag used to ask a work item to stop at its next safe point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type ResultSlot<T> = Arc<Mutex<Option<Result<T, WorkError>>>>;

/// Handle to a submitted work item.
///
/// The result is handed over through a mutex, so the worker and the main
/// schedule never touch the same value without holding the lock.
pub struct WorkHandle<T> {
    slot: ResultSlot<T>,
    cancel: CancelToken,
}

impl<T> WorkHandle<T> {
    /// Returns true when a result is waiting to be taken.
    pub fn is_finished(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Takes the result if the work item has finished.
    pub fn try_take(&mut self) -> Option<Result<T, WorkError>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Requests cancellation of the work item.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Runs blocking work on Bevy's IO task pool and keeps every spawned task
/// until it has been joined.
pub struct WorkerPool {
    next_id: u64,
    outstanding: Vec<(u64, Task<()>)>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// Creates a pool, initializing the global IO task pool if the app has not.
    pub fn new() -> Self {
        IoTaskPool::get_or_init(TaskPool::new);
        Self {
            next_id: 0,
            outstanding: Vec::new(),
        }
    }

    /// Submits `work` to run in the background.
    ///
    /// `work` receives `cancel` so long loops can stop early. If the token is
    /// already cancelled when the item starts, `work` is skipped and the
    /// handle yields [`WorkError::Cancelled`].
    pub fn submit<T, F>(&mut self, cancel: CancelToken, work: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.reap();

        let id = self.next_id;
        self.next_id += 1;

        let slot: ResultSlot<T> = Arc::new(Mutex::new(None));
        let worker_slot = slot.clone();
        let token = cancel.clone();

        let task = IoTaskPool::get().spawn(async move {
            let result = if token.is_cancelled() {
                Err(WorkError::Cancelled)
            } else {
                panic::catch_unwind(AssertUnwindSafe(|| work(&token))).map_err(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!("Work item {} panicked: {}", id, message);
                    WorkError::Panicked(message)
                })
            };
            *worker_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        });

        self.outstanding.push((id, task));
        WorkHandle { slot, cancel }
    }

    /// Forgets tasks that have already run to completion.
    pub fn reap(&mut self) {
        self.outstanding.retain(|(_, task)| !task.is_finished());
    }

    /// Number of work items that may still be running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Blocks until every outstanding work item has finished.
    pub fn join_all(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }
        debug!("Joining {} outstanding work items", self.outstanding.len());
        for (id, task) in self.outstanding.drain(..) {
            trace!("Waiting for work item {}", id);
            block_on(task);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use super::*;

    fn wait_for_result<T>(handle: &mut WorkHandle<T>) -> Result<T, WorkError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = handle.try_take() {
                return result;
            }
            assert!(Instant::now() < deadline, "Work item never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_submit_returns_result() {
        let mut pool = WorkerPool::new();
        let mut handle = pool.submit(CancelToken::new(), |_| 21 * 2);
        assert_eq!(wait_for_result(&mut handle), Ok(42));
        // The result is handed over once.
        assert_eq!(handle.try_take(), None);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut pool = WorkerPool::new();
        let token = CancelToken::new();
        token.cancel();
        let mut handle = pool.submit(token, |_| "never");
        assert_eq!(wait_for_result(&mut handle), Err(WorkError::Cancelled));
    }

    #[test]
    fn test_panic_is_captured() {
        let mut pool = WorkerPool::new();
        let mut handle = pool.submit(CancelToken::new(), |_| -> u32 { panic!("disk on fire") });
        assert_eq!(
            wait_for_result(&mut handle),
            Err(WorkError::Panicked("disk on fire".to_string()))
        );
    }

    #[test]
    fn test_join_all_waits_for_running_work() {
        let mut pool = WorkerPool::new();
        let (release, gate) = mpsc::channel::<()>();
        let mut handle = pool.submit(CancelToken::new(), move |token| {
            // Block until released or cancelled.
            while gate.recv_timeout(Duration::from_millis(5)).is_err() {
                if token.is_cancelled() {
                    return false;
                }
            }
            true
        });
        assert_eq!(pool.outstanding(), 1);

        handle.cancel();
        drop(release);
        pool.join_all();

        assert_eq!(pool.outstanding(), 0);
        assert!(handle.is_finished());
        assert!(handle.try_take().is_some());
    }

    #[test]
    fn test_reap_drops_finished_tasks() {
        let mut pool = WorkerPool::new();
        let mut handle = pool.submit(CancelToken::new(), |_| ());
        wait_for_result(&mut handle).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.outstanding() > 0 {
            pool.reap();
            assert!(Instant::now() < deadline, "Task never reported finished");
        }
    }
}
