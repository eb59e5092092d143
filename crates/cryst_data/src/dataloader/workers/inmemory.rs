//! src/dataloader/workers/inmemory.rs
//!
//! Workers for random-access datasets.
//!
//! Workers fetch samples on demand using indices and collate them into
//! mini-batches.
//!
//! # Architecture:
//! - Workers share the dataset via `Arc` for zero-copy access.
//! - A fresh pool is spawned for every epoch; each worker seeds its RNG from
//!   `(base_seed, epoch, worker_id)` before touching any task.
//! - Batch `i` always goes to worker `i % num_workers`, so the random
//!   transforms applied to a batch depend only on the seed and the epoch.

use crate::collator::Collator;
use crate::dataset::Dataset;
use crate::minibatch::MiniBatch;
use crate::sample::Sample;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::pool::WorkerPool;
use crate::dataloader::common::thread::worker_init;

/// A batch of dataset indices plus its position in the epoch.
#[derive(Debug)]
pub(crate) struct BatchTask {
    pub(crate) batch_index: usize,
    pub(crate) indices: Vec<usize>,
}

/// A processed batch tagged with its position in the epoch.
pub(crate) type BatchOutput = (usize, Result<MiniBatch>);

/// Manages the workers of one epoch.
pub(crate) struct InMemoryWorkerManager {
    worker_pool: WorkerPool<BatchTask, BatchOutput>,
}

impl InMemoryWorkerManager {
    /// Spawns `num_workers` workers for `epoch`.
    pub(crate) fn new<D, C>(
        num_workers: usize,
        prefetch_factor: usize,
        dataset: Arc<D>,
        collator: C,
        epoch: usize,
        base_seed: u64,
    ) -> Result<Self>
    where
        D: Dataset + ?Sized + 'static,
        C: Collator + Clone + Send + Sync + 'static,
    {
        let worker_pool = WorkerPool::new(
            num_workers,
            prefetch_factor,
            move |worker_id, task_rx, output_tx, shutdown| {
                worker_init(worker_id, num_workers, epoch, base_seed);
                debug!(worker_id, epoch, "Worker started");

                while let Ok(BatchTask {
                    batch_index,
                    indices,
                }) = task_rx.recv()
                {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    let result = catch_unwind(AssertUnwindSafe(|| {
                        process_batch(dataset.as_ref(), &indices, &collator)
                    }))
                    .unwrap_or_else(|_| Err(anyhow!("Worker {} panicked", worker_id)))
                    .with_context(|| {
                        format!("Worker {} failed on batch {}", worker_id, batch_index)
                    });

                    if output_tx.send((batch_index, result)).is_err() {
                        break;
                    }
                }
            },
        )
        .context("Failed to start data loading workers")?;

        Ok(Self { worker_pool })
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.worker_pool.num_workers()
    }

    /// Routes batch `batch_index` to its worker.
    pub(crate) fn send_batch(&self, batch_index: usize, indices: Vec<usize>) -> Result<()> {
        let worker_id = batch_index % self.num_workers();
        self.worker_pool.send(
            worker_id,
            BatchTask {
                batch_index,
                indices,
            },
        )
    }

    /// Receives the next finished batch, in completion order.
    pub(crate) fn receive(&self, timeout: Duration) -> Result<BatchOutput> {
        self.worker_pool
            .output()?
            .recv_timeout(timeout)
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    warn!(?timeout, "Timed out waiting for data loading workers");
                    anyhow!(
                        "Worker timeout after {:?} - possible deadlock or slow data loading",
                        timeout
                    )
                }
                RecvTimeoutError::Disconnected => {
                    anyhow!("Worker channel disconnected - workers may have crashed")
                }
            })
    }
}

/// Fetches the samples of `indices` and collates them.
///
/// Shared by worker threads and single-threaded loading.
pub(crate) fn process_batch<D, C>(dataset: &D, indices: &[usize], collator: &C) -> Result<MiniBatch>
where
    D: Dataset + ?Sized,
    C: Collator,
{
    let samples = indices
        .iter()
        .map(|&index| {
            dataset.get_sample(index).with_context(|| {
                format!(
                    "Failed to load sample at index {} (dataset size: {})",
                    index,
                    dataset.len()
                )
            })
        })
        .collect::<Result<Vec<Sample>>>()?;

    collator
        .collate(&samples)
        .with_context(|| format!("Failed to collate batch of {} samples", samples.len()))
}
