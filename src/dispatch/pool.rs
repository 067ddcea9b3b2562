//! Task submission for parallel dispatch.
//!
//! Parallel invokers depend only on [`TaskExecutor`]. [`WorkerPool`] is the
//! bundled implementation: a fixed set of named threads draining one bounded
//! queue. Submission never blocks the producer.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, NotifyError, NotifyResult, ValidationError};

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts independent units of work.
pub trait TaskExecutor: Send + Sync {
    /// Schedules `task`. Must not block the caller.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` if the task cannot be accepted.
    fn submit(&self, task: Task) -> Result<(), DispatchError>;
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued tasks before submissions are rejected.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 4096,
        }
    }
}

/// Fixed-size thread pool with a bounded queue.
pub struct WorkerPool {
    name: String,
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Starts `config.workers` threads named `{name}-{idx}`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn start(name: impl Into<String>, config: &PoolConfig) -> NotifyResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "worker pool name cannot be empty".to_string(),
            }
            .into());
        }

        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Task>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Task> = rx.clone();
            let thread_name = format!("{name}-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&rx))
                .map_err(|e| NotifyError::internal(format!("failed to spawn dispatch worker: {e}")))?;
            handles.push(handle);
        }

        tracing::debug!(pool = %name, workers, queue_capacity, "notify.pool.started");
        Ok(Self {
            name,
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Tasks queued but not yet picked up by a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// Stops accepting work, drains the queue and joins every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel lets workers drain queued tasks and then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: &Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        // Keep the worker alive if a task panics.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::warn!("notify.pool.task_panicked");
        }
    }
}

impl TaskExecutor for WorkerPool {
    fn submit(&self, task: Task) -> Result<(), DispatchError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(DispatchError::Disconnected {
                pool: self.name.clone(),
            });
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull {
                pool: self.name.clone(),
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::Disconnected {
                pool: self.name.clone(),
            }),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Deterministic shutdown: workers block on `recv()` and exit once the sender is gone.
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn pool_runs_submitted_tasks() {
        let pool = WorkerPool::start("test-pool", &PoolConfig { workers: 2, queue_capacity: 16 }).unwrap();
        assert_eq!(pool.worker_count(), 2);

        let (tx, rx) = bounded::<usize>(16);
        for i in 0..8 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let _ = tx.send(i);
            }))
            .unwrap();
        }

        let mut got: Vec<usize> = (0..8).map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn pool_rejects_when_queue_is_full() {
        let pool = WorkerPool::start("full-pool", &PoolConfig { workers: 1, queue_capacity: 1 }).unwrap();

        // Occupy the only worker until released.
        let (release_tx, release_rx) = bounded::<()>(1);
        let (started_tx, started_rx) = bounded::<()>(1);
        pool.submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        pool.submit(Box::new(|| {})).unwrap();
        let err = pool.submit(Box::new(|| {})).unwrap_err();
        assert_eq!(
            err,
            DispatchError::QueueFull {
                pool: "full-pool".to_string(),
                capacity: 1,
            }
        );

        release_tx.send(()).unwrap();
    }

    #[test]
    fn worker_survives_panicking_task() {
        let pool = WorkerPool::start("panic-pool", &PoolConfig { workers: 1, queue_capacity: 4 }).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();

        let (tx, rx) = bounded::<()>(1);
        pool.submit(Box::new(move || {
            let _ = tx.send(());
        }))
        .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let pool = WorkerPool::start("drain-pool", &PoolConfig { workers: 1, queue_capacity: 8 }).unwrap();
        let (tx, rx) = bounded::<u32>(8);
        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let _ = tx.send(i);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(rx.try_iter().count(), 4);
    }

    #[test]
    fn pool_config_deserializes_with_defaults() {
        let cfg: PoolConfig = serde_json::from_str(r#"{"workers": 8}"#).unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.queue_capacity, PoolConfig::default().queue_capacity);
    }
}
