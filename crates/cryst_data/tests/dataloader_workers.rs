//! Worker lifecycle and concurrency tests for DataLoader.
//!
//! Tests cover:
//! - Worker lifecycle (startup, cleanup)
//! - Worker failure handling (panics, errors, timeouts)
//! - Memory management (backpressure, prefetch bounds)
//! - Ordering and deterministic batch-to-worker routing

mod common;
use common::TaggedDataset;

use cryst_data::{
    dataloader::{worker_info, DataLoader, DataLoaderConfig},
    Dataset, Sample,
};

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tch::Tensor;

// ============================================================================
// Common Helper Datasets
// ============================================================================

/// Counts how many samples workers have started building.
struct CountingDataset {
    len: usize,
    delay: Duration,
    started: Arc<AtomicUsize>,
}

impl Dataset for CountingDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get_sample(&self, index: usize) -> Result<Sample> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(Sample::from_single("num_atoms", Tensor::from_slice(&[1i64]))
            .with_feature("index", Tensor::from_slice(&[index as i64])))
    }
}

/// Records which worker built each sample; early indices are the slowest.
struct WorkerRecordingDataset {
    len: usize,
}

impl Dataset for WorkerRecordingDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get_sample(&self, index: usize) -> Result<Sample> {
        std::thread::sleep(Duration::from_millis((self.len - index) as u64));
        let worker = worker_info().map(|w| w.id as i64).unwrap_or(-1);
        let thread_ok = std::thread::current()
            .name()
            .is_some_and(|n| n.starts_with("dataloader-worker-")) as i64;
        Ok(Sample::from_single("num_atoms", Tensor::from_slice(&[1i64]))
            .with_feature("index", Tensor::from_slice(&[index as i64]))
            .with_feature("worker", Tensor::from_slice(&[worker]))
            .with_feature("named_thread", Tensor::from_slice(&[thread_ok])))
    }
}

fn indices(batch: &cryst_data::MiniBatch, key: &str) -> Result<Vec<i64>> {
    Ok(Vec::<i64>::try_from(batch.get(key)?)?)
}

// ============================================================================
// 1. Worker Lifecycle Tests
// ============================================================================

#[test]
fn test_dataloader_fresh_workers_cleanup() -> Result<()> {
    let started = Arc::new(AtomicUsize::new(0));
    let dataset = Arc::new(CountingDataset {
        len: 100,
        delay: Duration::from_millis(10),
        started: started.clone(),
    });

    let config = DataLoaderConfig::builder()
        .batch_size(1)
        .num_workers(2)
        .prefetch_factor(1)
        .build();
    let loader = DataLoader::new(dataset, config)?;

    let mut iter = loader.iter()?;
    let _first = iter.next().unwrap()?;
    drop(iter);

    std::thread::sleep(Duration::from_millis(200));
    let total = started.load(Ordering::SeqCst);
    assert!(
        total < 10,
        "Workers should stop once the iterator is dropped, but built {} samples",
        total
    );
    Ok(())
}

#[test]
fn test_batches_routed_round_robin_and_yielded_in_order() -> Result<()> {
    let config = DataLoaderConfig::builder()
        .batch_size(2)
        .num_workers(3)
        .prefetch_factor(2)
        .build();
    let loader = DataLoader::new(Arc::new(WorkerRecordingDataset { len: 24 }), config)?;

    let mut seen = Vec::new();
    for (batch_index, batch) in loader.iter()?.enumerate() {
        let batch = batch?;
        assert_eq!(
            indices(&batch, "worker")?,
            vec![(batch_index % 3) as i64; 2],
            "batch {} built by the wrong worker",
            batch_index
        );
        assert_eq!(indices(&batch, "named_thread")?, vec![1, 1]);
        seen.extend(indices(&batch, "index")?);
    }
    assert_eq!(seen, (0..24).collect::<Vec<i64>>());
    Ok(())
}

#[test]
fn test_single_threaded_loading_runs_as_worker_zero() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(4).build();
    let loader = DataLoader::new(Arc::new(WorkerRecordingDataset { len: 8 }), config)?;
    for batch in loader.iter()? {
        let batch = batch?;
        assert_eq!(indices(&batch, "worker")?, vec![0; 4]);
    }
    Ok(())
}

// ============================================================================
// 2. Worker Failure and Error Handling Tests
// ============================================================================

#[test]
fn test_dataloader_worker_error_propagation() -> Result<()> {
    for num_workers in [0, 2] {
        let dataset = Arc::new(TaggedDataset {
            fail_at: Some(7),
            ..TaggedDataset::new(20)
        });
        let config = DataLoaderConfig::builder()
            .batch_size(5)
            .num_workers(num_workers)
            .build();
        let loader = DataLoader::new(dataset, config)?;

        let results: Vec<_> = loader.iter()?.collect();
        assert_eq!(results.len(), 4, "iteration continues past a failed batch");
        for (i, result) in results.iter().enumerate() {
            match (i, result) {
                (1, Err(e)) => assert!(format!("{:#}", e).contains("corrupt crystal 7")),
                (1, Ok(_)) => panic!("batch 1 should fail with {} workers", num_workers),
                (_, r) => assert!(r.is_ok(), "batch {} should succeed", i),
            }
        }
    }
    Ok(())
}

#[test]
fn test_dataloader_worker_panic_isolation() -> Result<()> {
    let dataset = Arc::new(TaggedDataset {
        panic_at: Some(12),
        ..TaggedDataset::new(20)
    });
    let config = DataLoaderConfig::builder()
        .batch_size(5)
        .num_workers(2)
        .build();
    let loader = DataLoader::new(dataset, config)?;

    let results: Vec<_> = loader.iter()?.collect();
    assert_eq!(results.len(), 4);
    let failed: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_err())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(failed, vec![2]);
    let msg = format!("{:#}", results[2].as_ref().unwrap_err());
    assert!(msg.contains("panicked"), "unexpected error: {}", msg);
    Ok(())
}

// ============================================================================
// 3. Timeout Tests
// ============================================================================

#[test]
fn test_dataloader_worker_timeout_behavior() -> Result<()> {
    let slow = Arc::new(TaggedDataset {
        delay: Duration::from_millis(1000),
        ..TaggedDataset::new(2)
    });
    let config = DataLoaderConfig::builder()
        .batch_size(1)
        .num_workers(1)
        .timeout(Duration::from_millis(100))
        .build();
    let loader = DataLoader::new(slow, config)?;
    let mut iter = loader.iter()?;

    match iter.next() {
        Some(Err(e)) => assert!(
            e.to_string().contains("timeout"),
            "Expected timeout-related error, but got: {}",
            e
        ),
        Some(Ok(_)) => panic!("Expected timeout error but got successful result"),
        None => panic!("Expected timeout error but got None"),
    }
    assert!(iter.next().is_none(), "A timed-out epoch ends");

    let fast = Arc::new(TaggedDataset {
        delay: Duration::from_millis(10),
        ..TaggedDataset::new(2)
    });
    let config = DataLoaderConfig::builder()
        .batch_size(1)
        .num_workers(1)
        .timeout(Duration::from_millis(500))
        .build();
    let loader = DataLoader::new(fast, config)?;
    assert!(loader.iter()?.all(|r| r.is_ok()), "Fast dataset should not time out");
    Ok(())
}

// ============================================================================
// 4. Memory Management Tests
// ============================================================================

#[test]
fn test_dataloader_backpressure_memory_bounds() -> Result<()> {
    let started = Arc::new(AtomicUsize::new(0));
    let dataset = Arc::new(CountingDataset {
        len: 200,
        delay: Duration::from_millis(1),
        started: started.clone(),
    });

    let num_workers = 4;
    let prefetch_factor = 2;
    let batch_size = 5;
    let config = DataLoaderConfig::builder()
        .batch_size(batch_size)
        .num_workers(num_workers)
        .prefetch_factor(prefetch_factor)
        .build();
    let loader = DataLoader::new(dataset, config)?;

    let mut iter = loader.iter()?;
    for consumed in 1..=3 {
        let _batch = iter.next().unwrap()?;
        // Slow consumer: give the workers time to run ahead.
        std::thread::sleep(Duration::from_millis(100));

        let bound = (consumed + num_workers * prefetch_factor) * batch_size;
        let built = started.load(Ordering::SeqCst);
        assert!(
            built <= bound,
            "Workers built {} samples after {} batches, bound is {}",
            built,
            consumed,
            bound
        );
    }
    Ok(())
}
