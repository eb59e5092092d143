//! Worker pool implementation for parallel data loading.
//!
//! Provides a thread pool that manages worker lifecycle, task distribution,
//! and result collection.
//!
//! # Key features
//! - Bounded channels prevent memory bloat
//! - Graceful shutdown on drop
//! - Per-worker task channels: the main thread decides which worker runs
//!   which task, so worker RNG streams map to batches deterministically

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Thread pool for parallel data loading.
///
/// Manages worker lifecycle and communication through bounded channels:
/// - Task channels: Main thread -> Worker `i` (work distribution)
/// - Output channel: Workers -> Main thread (result collection)
/// - Shutdown flag: Enables graceful termination
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_txs: Vec<Sender<Task>>,
    output_rx: Option<Receiver<Output>>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads, each running `worker_fn(worker_id, tasks, outputs, shutdown)`.
    ///
    /// Every worker owns a task channel of capacity `buffer_size`; the output
    /// channel holds up to `buffer_size * num_workers` results.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            bail!(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or use single-threaded mode."
            );
        }
        if buffer_size == 0 {
            bail!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            );
        }

        let (output_tx, output_rx) = bounded(buffer_size * num_workers);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);

        let mut pool = Self {
            workers: Vec::with_capacity(num_workers),
            task_txs: Vec::with_capacity(num_workers),
            output_rx: Some(output_rx),
            shutdown: shutdown.clone(),
        };

        for worker_id in 0..num_workers {
            let (task_tx, task_rx) = bounded(buffer_size);
            let output_tx = output_tx.clone();
            let shutdown = shutdown.clone();
            let worker_fn = worker_fn.clone();

            // On failure `pool` is dropped here, which joins the workers
            // already spawned.
            let handle = thread::Builder::new()
                .name(format!("dataloader-worker-{}", worker_id))
                .spawn(move || worker_fn(worker_id, task_rx, output_tx, shutdown))
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            pool.task_txs.push(task_tx);
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.task_txs.len()
    }

    /// Sends `task` to worker `worker_id`, blocking while its queue is full.
    pub(crate) fn send(&self, worker_id: usize, task: Task) -> Result<()> {
        let Some(tx) = self.task_txs.get(worker_id) else {
            bail!(
                "Worker {} does not exist (pool has {} workers)",
                worker_id,
                self.task_txs.len()
            );
        };
        tx.send(task)
            .map_err(|_| anyhow::anyhow!("Worker {} has stopped accepting tasks", worker_id))
    }

    pub(crate) fn output(&self) -> Result<&Receiver<Output>> {
        self.output_rx
            .as_ref()
            .context("Worker pool output channel already closed")
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Relaxed);

        // Close task channels so idle workers return, and the output channel
        // so workers blocked on a full output queue fail their send.
        self.task_txs.clear();
        self.output_rx.take();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
