//! src/dataloader/common/mod.rs
//!
//! Worker-local state shared by every loader mode: thread-local worker
//! identity, the worker RNG, and the seed expansion it is built from.

pub mod seed_sequence;
pub mod thread;
