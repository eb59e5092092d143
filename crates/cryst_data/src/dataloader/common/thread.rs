//! Thread-local worker state.
//!
//! Every loader worker records who it is and owns a private RNG. The RNG is
//! seeded from the worker's initial seed, `base_seed + (epoch << 32) + worker_id`,
//! expanded through a [`SeedSequence`] so that numerically adjacent initial
//! seeds still produce unrelated streams. With a fixed base seed the
//! randomness of every worker in every epoch is reproducible; without one the
//! base seed is drawn at random by the loader.

use super::seed_sequence::SeedSequence;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::ops::Range;

/// Identity of the loader worker running on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Worker index in `0..num_workers` (0 on the main thread when `num_workers = 0`).
    pub id: usize,
    /// Total number of workers of the loader (0 for single-threaded loading).
    pub num_workers: usize,
    /// Epoch the worker is serving.
    pub epoch: usize,
    /// Initial seed the worker RNG was derived from.
    pub seed: u64,
}

thread_local! {
    /// Set by [`worker_init`]; `None` outside loader workers.
    static WORKER_INFO: RefCell<Option<WorkerInfo>> = const { RefCell::new(None) };

    /// Thread-local RNG for deterministic randomness in workers
    static WORKER_RNG: RefCell<Option<StdRng>> = const { RefCell::new(None) };
}

/// Initial seed of a worker for a given epoch.
pub fn worker_seed(base_seed: u64, epoch: usize, worker_id: usize) -> u64 {
    base_seed
        .wrapping_add((epoch as u64) << 32)
        .wrapping_add(worker_id as u64)
}

fn rng_from_worker_seed(seed: u64) -> StdRng {
    let mut bytes = <StdRng as SeedableRng>::Seed::default();
    SeedSequence::new(&[seed]).fill_bytes(bytes.as_mut());
    StdRng::from_seed(bytes)
}

/// Worker identity and RNG that are not installed on any thread.
///
/// Single-threaded loaders keep one per epoch and install it on the calling
/// thread with a [`WorkerScope`] only while a batch is built, so interleaved
/// loaders on the same thread never share an RNG stream.
pub(crate) struct WorkerState {
    info: Option<WorkerInfo>,
    rng: Option<StdRng>,
}

impl WorkerState {
    pub(crate) fn new(worker_id: usize, num_workers: usize, epoch: usize, base_seed: u64) -> Self {
        let seed = worker_seed(base_seed, epoch, worker_id);
        Self {
            info: Some(WorkerInfo {
                id: worker_id,
                num_workers,
                epoch,
                seed,
            }),
            rng: Some(rng_from_worker_seed(seed)),
        }
    }

    /// Exchanges this state with the current thread's.
    fn swap_with_thread(&mut self) {
        WORKER_INFO.with(|info| std::mem::swap(&mut *info.borrow_mut(), &mut self.info));
        WORKER_RNG.with(|rng| std::mem::swap(&mut *rng.borrow_mut(), &mut self.rng));
    }
}

/// Installs a [`WorkerState`] on the current thread until dropped. Dropping
/// writes the advanced RNG back into the state and restores whatever the
/// thread held before, also when a batch panics.
pub(crate) struct WorkerScope<'a> {
    state: &'a mut WorkerState,
}

impl<'a> WorkerScope<'a> {
    pub(crate) fn enter(state: &'a mut WorkerState) -> Self {
        state.swap_with_thread();
        Self { state }
    }
}

impl Drop for WorkerScope<'_> {
    fn drop(&mut self) {
        self.state.swap_with_thread();
    }
}

/// Initializes the current thread as worker `worker_id` for `epoch`.
///
/// Called once per worker thread at spawn.
pub fn worker_init(worker_id: usize, num_workers: usize, epoch: usize, base_seed: u64) {
    let mut state = WorkerState::new(worker_id, num_workers, epoch, base_seed);
    state.swap_with_thread();
}

/// Returns the worker identity of the current thread, if it is a loader worker.
pub fn worker_info() -> Option<WorkerInfo> {
    WORKER_INFO.with(|info| *info.borrow())
}

/// Runs `f` with the worker RNG, or with a thread RNG outside worker context.
pub fn with_worker_rng<T>(f: impl FnOnce(&mut dyn rand::RngCore) -> T) -> T {
    WORKER_RNG.with(|rng| {
        let mut rng_ref = rng.borrow_mut();
        match rng_ref.as_mut() {
            Some(rng) => f(rng),
            None => f(&mut rand::rng()),
        }
    })
}

/// Uniform draw from `range` using the worker RNG.
pub fn worker_gen_range(range: Range<f64>) -> f64 {
    with_worker_rng(|rng| rng.random_range(range))
}
