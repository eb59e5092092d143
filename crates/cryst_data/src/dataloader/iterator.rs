//! src/dataloader/iterator.rs
//!
//! Iteration over one epoch of a [`DataLoader`].
//!
//! - Single-threaded (`num_workers = 0`): batches are fetched and collated on
//!   the calling thread, which acts as worker 0 of the epoch while each batch
//!   is built.
//! - Multi-threaded: batch indices are dispatched to a fresh worker pool.
//!   At most `num_workers * prefetch_factor` batches are in flight, and a
//!   reorder buffer yields them in sampler order regardless of which worker
//!   finishes first.
//!
//! A failed batch is yielded as `Err` and iteration continues with the next
//! one. A timed-out or crashed worker pool ends the epoch after reporting the
//! error once.

use crate::collator::Collator;
use crate::dataset::Dataset;
use crate::minibatch::MiniBatch;
use crate::sampler::Sampler;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use super::common::thread::{WorkerScope, WorkerState};
use super::loader::DataLoader;
use super::workers::inmemory::{process_batch, InMemoryWorkerManager};

type BatchIndices<'a> = Box<dyn Iterator<Item = Vec<usize>> + Send + 'a>;

/// Iterator over the batches of one epoch.
pub struct DataLoaderIter<'a, D: ?Sized, C> {
    loader: &'a DataLoader<D, C>,
    epoch: usize,
    batches: BatchIndices<'a>,
    mode: Mode,
    finished: bool,
}

enum Mode {
    Single {
        state: WorkerState,
    },
    Multi {
        manager: InMemoryWorkerManager,
        capacity: usize,
        next_to_send: usize,
        next_to_yield: usize,
        exhausted: bool,
        reorder: BTreeMap<usize, Result<MiniBatch>>,
    },
}

impl<'a, D, C> DataLoaderIter<'a, D, C>
where
    D: Dataset + ?Sized + 'static,
    C: Collator + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(loader: &'a DataLoader<D, C>, epoch: usize) -> Result<Self> {
        let config = &loader.config;
        let mode = if config.num_workers == 0 {
            Mode::Single {
                state: WorkerState::new(0, 0, epoch, loader.runtime_seed),
            }
        } else {
            let manager = InMemoryWorkerManager::new(
                config.num_workers,
                config.prefetch_factor,
                Arc::clone(&loader.dataset),
                loader.collator.clone(),
                epoch,
                loader.runtime_seed,
            )?;
            Mode::Multi {
                manager,
                capacity: config.num_workers * config.prefetch_factor,
                next_to_send: 0,
                next_to_yield: 0,
                exhausted: false,
                reorder: BTreeMap::new(),
            }
        };
        debug!(epoch, num_workers = config.num_workers, "Starting epoch");

        Ok(Self {
            loader,
            epoch,
            batches: loader.batch_sampler.iter(epoch),
            mode,
            finished: false,
        })
    }

    /// Epoch served by this iterator.
    pub fn epoch(&self) -> usize {
        self.epoch
    }
}

impl<D, C> Iterator for DataLoaderIter<'_, D, C>
where
    D: Dataset + ?Sized + 'static,
    C: Collator + Clone + Send + Sync + 'static,
{
    type Item = Result<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match &mut self.mode {
            Mode::Single { state } => {
                let Some(indices) = self.batches.next() else {
                    self.finished = true;
                    return None;
                };
                let _scope = WorkerScope::enter(state);
                Some(process_batch(
                    self.loader.dataset.as_ref(),
                    &indices,
                    &self.loader.collator,
                ))
            }
            Mode::Multi {
                manager,
                capacity,
                next_to_send,
                next_to_yield,
                exhausted,
                reorder,
            } => {
                // Keep the workers fed.
                while !*exhausted && *next_to_send - *next_to_yield < *capacity {
                    match self.batches.next() {
                        Some(indices) => {
                            if let Err(e) = manager.send_batch(*next_to_send, indices) {
                                self.finished = true;
                                return Some(Err(e));
                            }
                            *next_to_send += 1;
                        }
                        None => *exhausted = true,
                    }
                }

                if *next_to_yield == *next_to_send {
                    self.finished = true;
                    return None;
                }

                let timeout = self.loader.config.timeout;
                while !reorder.contains_key(&*next_to_yield) {
                    match manager.receive(timeout) {
                        Ok((batch_index, batch)) => {
                            reorder.insert(batch_index, batch);
                        }
                        Err(e) => {
                            error!(epoch = self.epoch, "Data loading aborted: {:#}", e);
                            self.finished = true;
                            return Some(Err(e));
                        }
                    }
                }

                let batch = reorder.remove(&*next_to_yield);
                *next_to_yield += 1;
                batch
            }
        }
    }
}
