//! Worker management for parallel data loading.
//!
//! - `pool`: Worker pool implementation
//! - `inmemory`: Workers for indexed datasets with random access

pub(crate) mod inmemory;
pub(crate) mod pool;
